/// Integration tests for the coroutine scheduler and library

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use moonwell_eval::{
    seq, Coroutine, CoroutineStatus, Error, Function, Runtime, Scheduler, Value, ValueSequence,
};

/// Yields `(1, 2)`, then returns `(3)`.
fn one_two_three(scheduler: &Scheduler) -> Function {
    let scheduler = scheduler.clone();
    Function::new(move |_args| {
        scheduler.yield_values(seq![1, 2])?;
        Ok(seq![3])
    })
}

fn as_coroutine(value: Value) -> Coroutine {
    match value {
        Value::Coroutine(co) => co,
        other => panic!("Expected coroutine, got {:?}", other),
    }
}

#[test]
fn test_yield_then_return_then_dead() {
    let scheduler = Scheduler::default();
    let co = scheduler.create(one_two_three(&scheduler));

    let r0 = scheduler.resume(&co, seq!["a0"]).unwrap();
    assert_eq!(r0.into_sequence(), seq![true, 1, 2]);

    let r1 = scheduler.resume(&co, seq!["a1"]).unwrap();
    assert_eq!(r1.into_sequence(), seq![true, 3]);

    let r2 = scheduler.resume(&co, seq!["a2"]).unwrap();
    assert_eq!(r2.into_sequence(), seq![false, "cannot resume dead coroutine"]);
    assert_eq!(scheduler.status(&co), CoroutineStatus::Dead);
}

#[test]
fn test_concurrent_resume_fails_fast() {
    let scheduler = Scheduler::default();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (proceed_tx, proceed_rx) = mpsc::channel::<()>();
    let proceed_rx = Mutex::new(proceed_rx);

    let co = scheduler.create(Function::new(move |_| {
        started_tx.send(()).ok();
        proceed_rx.lock().unwrap().recv().ok();
        Ok(seq!["first"])
    }));

    let (s, c) = (scheduler.clone(), co.clone());
    let first = thread::spawn(move || s.resume(&c, seq![]).unwrap());
    started_rx.recv().unwrap();

    // The first resume is still outstanding
    let err = scheduler.resume(&co, seq!["second"]).unwrap_err();
    assert!(matches!(err, Error::ResumeInProgress(id) if id == co.id()));
    assert_eq!(co.status(), CoroutineStatus::Running);

    proceed_tx.send(()).unwrap();
    let result = first.join().unwrap();
    assert_eq!(result.into_sequence(), seq![true, "first"]);
}

#[test]
fn test_cross_coroutine_resume_delivers_to_resumer() {
    let scheduler = Scheduler::default();

    let s = scheduler.clone();
    let b = scheduler.create(Function::new(move |_| {
        let got = s.yield_values(seq![10])?;
        Ok(got)
    }));

    let s = scheduler.clone();
    let inner_b = b.clone();
    let a = scheduler.create(Function::new(move |_| {
        let from_b = s.resume(&inner_b, ValueSequence::empty())?;
        assert!(from_b.success);
        let n = match from_b.values.first() {
            Value::Integer(n) => n,
            other => panic!("Expected integer from B, got {:?}", other),
        };
        s.yield_values(seq![n * 2])?;
        Ok(seq!["a done"])
    }));

    let top = scheduler.resume(&a, ValueSequence::empty()).unwrap();
    assert_eq!(top.into_sequence(), seq![true, 20]);
    assert_eq!(b.status(), CoroutineStatus::Suspended);
    assert_eq!(a.status(), CoroutineStatus::Suspended);

    // B is still parked and can be finished from the top level
    let rest = scheduler.resume(&b, seq!["late"]).unwrap();
    assert_eq!(rest.into_sequence(), seq![true, "late"]);
}

#[test]
fn test_nested_resume_statuses() {
    let scheduler = Scheduler::default();

    // C reports the status of everyone in the chain
    let s = scheduler.clone();
    let c = scheduler.create(Function::new(move |args| {
        let a = as_coroutine(args.get(0));
        let b = as_coroutine(args.get(1));
        let me = s.current().expect("C runs inside a coroutine");
        s.yield_values(seq![
            s.status(&a).as_str(),
            s.status(&b).as_str(),
            s.status(&me).as_str()
        ])?;
        Ok(ValueSequence::empty())
    }));

    let s = scheduler.clone();
    let inner_c = c.clone();
    let b = scheduler.create(Function::new(move |args| {
        let a = args.first();
        let me = s.current().expect("B runs inside a coroutine");
        let seen = s.resume(&inner_c, seq![a, me])?;
        Ok(seen.values)
    }));

    let s = scheduler.clone();
    let inner_b = b.clone();
    let a = scheduler.create(Function::new(move |_| {
        let me = s.current().expect("A runs inside a coroutine");
        let seen = s.resume(&inner_b, seq![me])?;
        assert_eq!(s.status(&s.current().unwrap()), CoroutineStatus::Running);
        Ok(seen.values)
    }));

    let result = scheduler.resume(&a, ValueSequence::empty()).unwrap();
    assert_eq!(result.into_sequence(), seq![true, "normal", "normal", "running"]);
    assert_eq!(a.status(), CoroutineStatus::Dead);
    assert_eq!(b.status(), CoroutineStatus::Dead);
    assert_eq!(c.status(), CoroutineStatus::Suspended);
    c.dispose();
}

#[test]
fn test_running_reports_current_coroutine() {
    let scheduler = Scheduler::default();
    let s = scheduler.clone();
    let co = scheduler.create(Function::new(move |_| {
        let (current, is_main) = s.running();
        Ok(seq![current.map(Value::Coroutine).unwrap_or_default(), is_main, s.is_yieldable()])
    }));

    let result = scheduler.resume(&co, ValueSequence::empty()).unwrap();
    assert_eq!(result.values, seq![Value::Coroutine(co.clone()), false, true]);

    let (current, is_main) = scheduler.running();
    assert!(current.is_none());
    assert!(is_main);
}

#[test]
fn test_dispose_unblocks_parked_coroutine() {
    let scheduler = Scheduler::default();
    let (events_tx, events_rx) = mpsc::channel::<&'static str>();

    let s = scheduler.clone();
    let co = scheduler.create(Function::new(move |_| match s.yield_values(seq![1]) {
        Ok(_) => {
            events_tx.send("resumed").ok();
            Ok(ValueSequence::empty())
        }
        Err(e) => {
            events_tx.send("cancelled").ok();
            Err(e)
        }
    }));

    scheduler.resume(&co, ValueSequence::empty()).unwrap();
    assert_eq!(co.status(), CoroutineStatus::Suspended);

    co.dispose();
    assert_eq!(co.status(), CoroutineStatus::Dead);
    assert_eq!(events_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "cancelled");

    let later = scheduler.resume(&co, ValueSequence::empty()).unwrap();
    assert_eq!(later.into_sequence(), seq![false, "cannot resume dead coroutine"]);

    // Idempotent
    co.dispose();
    assert_eq!(co.status(), CoroutineStatus::Dead);
}

#[test]
fn test_cancelled_coroutine_never_parks_again() {
    let scheduler = Scheduler::default();
    let (events_tx, events_rx) = mpsc::channel::<(bool, bool)>();

    let s = scheduler.clone();
    let co = scheduler.create(Function::new(move |_| {
        let first = s.yield_values(ValueSequence::empty());
        // Ignore the cancellation and try to park again
        let second = s.yield_values(ValueSequence::empty());
        events_tx
            .send((
                matches!(first, Err(Error::Cancelled)),
                matches!(second, Err(Error::Cancelled)),
            ))
            .ok();
        Ok(ValueSequence::empty())
    }));

    scheduler.resume(&co, ValueSequence::empty()).unwrap();
    co.dispose();
    let (first, second) = events_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(first);
    assert!(second);
}

#[test]
fn test_dispose_during_resume_reports_failure() {
    let scheduler = Scheduler::default();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (proceed_tx, proceed_rx) = mpsc::channel::<()>();
    let proceed_rx = Mutex::new(proceed_rx);

    let s = scheduler.clone();
    let co = scheduler.create(Function::new(move |_| {
        started_tx.send(()).ok();
        proceed_rx.lock().unwrap().recv().ok();
        s.yield_values(seq!["never seen"])?;
        Ok(ValueSequence::empty())
    }));

    let (s, c) = (scheduler.clone(), co.clone());
    let resumer = thread::spawn(move || s.resume(&c, ValueSequence::empty()).unwrap());
    started_rx.recv().unwrap();

    co.dispose();
    proceed_tx.send(()).unwrap();

    let result = resumer.join().unwrap();
    assert_eq!(result.into_sequence(), seq![false, "coroutine was cancelled"]);
    assert_eq!(co.status(), CoroutineStatus::Dead);
}

#[test]
fn test_body_error_is_delivered_to_resumer() {
    let scheduler = Scheduler::default();
    let co = scheduler.create(Function::new(|_| Err(Error::Exception(Value::from("boom")))));

    let result = scheduler.resume(&co, ValueSequence::empty()).unwrap();
    assert_eq!(result.into_sequence(), seq![false, "boom"]);
    assert_eq!(co.status(), CoroutineStatus::Dead);
    assert_eq!(scheduler.live_count(), 0);

    let co = scheduler.create(Function::new(|_| Err(Error::runtime("bad state"))));
    let result = scheduler.resume(&co, ValueSequence::empty()).unwrap();
    assert!(!result.success);
    assert_eq!(result.values, seq!["bad state"]);
}

#[test]
fn test_panicking_body_marks_coroutine_dead() {
    let scheduler = Scheduler::default();
    let co = scheduler.create(Function::new(|_| panic!("body exploded")));

    let result = scheduler.resume(&co, ValueSequence::empty()).unwrap();
    assert_eq!(result.into_sequence(), seq![false, "coroutine terminated unexpectedly"]);
    assert_eq!(co.status(), CoroutineStatus::Dead);
}

#[test]
fn test_wrap_returns_values_directly() {
    let scheduler = Scheduler::default();
    let s = scheduler.clone();
    let counter = scheduler.wrap(Function::new(move |args| {
        let mut n = match args.first() {
            Value::Integer(n) => n,
            _ => 0,
        };
        for _ in 0..3 {
            n += 1;
            s.yield_values(seq![n])?;
        }
        Ok(seq!["end"])
    }));

    assert_eq!(counter.call(seq![10]).unwrap(), seq![11]);
    assert_eq!(counter.call(ValueSequence::empty()).unwrap(), seq![12]);
    assert_eq!(counter.call(ValueSequence::empty()).unwrap(), seq![13]);
    assert_eq!(counter.call(ValueSequence::empty()).unwrap(), seq!["end"]);

    match counter.call(ValueSequence::empty()) {
        Err(Error::Exception(Value::String(s))) => assert_eq!(s, "cannot resume dead coroutine"),
        other => panic!("Expected Exception, got {:?}", other),
    }
}

#[test]
fn test_dropping_wrapped_function_disposes_worker() {
    let scheduler = Scheduler::default();
    let (events_tx, events_rx) = mpsc::channel::<&'static str>();

    let s = scheduler.clone();
    let wrapped = scheduler.wrap(Function::new(move |_| {
        let outcome = s.yield_values(seq![1]);
        events_tx.send(if outcome.is_err() { "cancelled" } else { "resumed" }).ok();
        outcome
    }));

    assert_eq!(wrapped.call(ValueSequence::empty()).unwrap(), seq![1]);
    drop(wrapped);
    assert_eq!(events_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "cancelled");
}

#[tokio::test]
async fn test_begin_resume_can_be_awaited() {
    let scheduler = Scheduler::default();
    let co = scheduler.create(one_two_three(&scheduler));

    let first = scheduler.begin_resume(&co, ValueSequence::empty()).unwrap().await;
    assert_eq!(first.into_sequence(), seq![true, 1, 2]);

    let pending = scheduler.begin_resume(&co, ValueSequence::empty()).unwrap();
    // A second begin while the first is unobserved is rejected
    assert!(matches!(
        scheduler.begin_resume(&co, ValueSequence::empty()),
        Err(Error::ResumeInProgress(_))
    ));
    let second = pending.await;
    assert_eq!(second.into_sequence(), seq![true, 3]);

    let third = scheduler.begin_resume(&co, ValueSequence::empty()).unwrap().await;
    assert!(!third.success);
}

#[tokio::test]
async fn test_blocking_resume_from_async_context() {
    let scheduler = Scheduler::default();
    let co = scheduler.create(one_two_three(&scheduler));

    let first = scheduler.resume(&co, ValueSequence::empty()).unwrap();
    assert_eq!(first.into_sequence(), seq![true, 1, 2]);

    let s = scheduler.clone();
    let wrapped = scheduler.wrap(Function::new(move |args| {
        let next = s.yield_values(args)?;
        Ok(next)
    }));
    assert_eq!(wrapped.call(seq!["ping"]).unwrap(), seq!["ping"]);
    assert_eq!(wrapped.call(seq!["pong"]).unwrap(), seq!["pong"]);
}

#[test]
fn test_unreachable_library_coroutine_is_reclaimed() {
    let rt = Runtime::default();
    let lib = rt.coroutine_library();
    let yield_fn = lib.function("yield").unwrap();
    let body = Function::new(move |args| yield_fn.call(args));

    let co = lib.call("create", seq![body]).unwrap().first();
    let resumed = lib.call("resume", seq![co.clone(), "parked"]).unwrap();
    assert_eq!(resumed, seq![true, "parked"]);
    assert_eq!(rt.scheduler().live_count(), 1);

    drop(co);
    let mut live = rt.scheduler().live_count();
    for _ in 0..500 {
        if live == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
        live = rt.scheduler().live_count();
    }
    assert_eq!(live, 0);
}

#[test]
fn test_library_round_trip() {
    let rt = Runtime::default();
    let lib = rt.coroutine_library();
    let yield_fn = lib.function("yield").unwrap();

    let body = Function::new(move |args| {
        let sum = args.iter().fold(0, |acc, v| match v {
            Value::Integer(n) => acc + n,
            _ => acc,
        });
        let next = yield_fn.call(seq![sum])?;
        Ok(seq!["got", next])
    });

    let co = lib.call("create", seq![body]).unwrap().first();
    assert_eq!(lib.call("status", seq![co.clone()]).unwrap(), seq!["suspended"]);

    let r = lib.call("resume", seq![co.clone(), 1, 2, 3]).unwrap();
    assert_eq!(r, seq![true, 6]);

    let r = lib.call("resume", seq![co.clone(), "x", "y"]).unwrap();
    assert_eq!(r, seq![true, "got", "x", "y"]);
    assert_eq!(lib.call("status", seq![co.clone()]).unwrap(), seq!["dead"]);

    let r = lib.call("resume", seq![co]).unwrap();
    assert_eq!(r, seq![false, "cannot resume dead coroutine"]);
}

#[test]
fn test_library_wrap() {
    let rt = Runtime::default();
    let lib = rt.coroutine_library();
    let yield_fn = lib.function("yield").unwrap();

    let body = Function::new(move |_| {
        yield_fn.call(seq!["a"])?;
        Ok(seq!["b"])
    });
    let wrapped = match lib.call("wrap", seq![body]).unwrap().first() {
        Value::Function(f) => f,
        other => panic!("Expected function, got {:?}", other),
    };

    assert_eq!(wrapped.call(ValueSequence::empty()).unwrap(), seq!["a"]);
    assert_eq!(wrapped.call(ValueSequence::empty()).unwrap(), seq!["b"]);
    assert!(wrapped.call(ValueSequence::empty()).is_err());
}

#[test]
fn test_many_live_coroutines() {
    let scheduler = Scheduler::default();
    let handles: Vec<Coroutine> = (0..8)
        .map(|i| {
            let s = scheduler.clone();
            scheduler.create(Function::new(move |_| {
                let next = s.yield_values(seq![i])?;
                Ok(next)
            }))
        })
        .collect();

    for (i, co) in handles.iter().enumerate() {
        let r = scheduler.resume(co, ValueSequence::empty()).unwrap();
        assert_eq!(r.values, seq![i as i64]);
    }
    assert_eq!(scheduler.live_count(), 8);

    for (i, co) in handles.iter().enumerate().rev() {
        let r = scheduler.resume(co, seq![format!("done {}", i)]).unwrap();
        assert_eq!(r.values, seq![format!("done {}", i)]);
    }
    assert_eq!(scheduler.live_count(), 0);
}

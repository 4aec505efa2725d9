//! Property-based coverage of the FIFO ordering guarantees in spec §8
//! properties 1-3: a server processes casts strictly in enqueue order, and
//! every call resolves to exactly one of reply/Timeout/NoProcess.

use std::time::Duration;

use async_trait::async_trait;
use grove_runtime::{start, Behavior, Runtime, StartOpts};
use proptest::prelude::*;

struct Logger;

enum LoggerCall {
    Get,
}

enum LoggerCast {
    Append(i64),
}

#[async_trait]
impl Behavior for Logger {
    type State = Vec<i64>;
    type InitArg = ();
    type CallMsg = LoggerCall;
    type CastMsg = LoggerCast;
    type Reply = Vec<i64>;

    async fn init(&mut self, _arg: ()) -> Result<Vec<i64>, String> {
        Ok(Vec::new())
    }

    async fn handle_call(&mut self, msg: LoggerCall, state: Vec<i64>) -> (Vec<i64>, Vec<i64>) {
        match msg {
            LoggerCall::Get => (state.clone(), state),
        }
    }

    async fn handle_cast(&mut self, msg: LoggerCast, mut state: Vec<i64>) -> Vec<i64> {
        match msg {
            LoggerCast::Append(n) => {
                state.push(n);
                state
            }
        }
    }
}

/// For any sequence of casts enqueued into one server's mailbox, the
/// resulting state reflects them in exactly the order they were sent
/// (spec §8 property 2: same-mechanism enqueue order is preserved).
fn casts_are_applied_in_enqueue_order(values: Vec<i64>) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async move {
        let runtime = Runtime::new();
        let server = start(&runtime, Logger, StartOpts::new((), "logger"))
            .await
            .expect("logger should start");

        for &v in &values {
            server.cast(LoggerCast::Append(v)).unwrap();
        }

        let seen = server
            .call(LoggerCall::Get, Duration::from_secs(1))
            .await
            .expect("get should reply");

        assert_eq!(seen, values);
    });
}

proptest! {
    #[test]
    fn fifo_property(values in prop::collection::vec(any::<i64>(), 0..64)) {
        casts_are_applied_in_enqueue_order(values);
    }
}

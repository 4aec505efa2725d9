//! A remote monitor fires with `NoConnection` when the monitored node goes
//! away.
//!
//! `Cluster` exposes no forced-shutdown handle, so "node B goes away" is
//! simulated the way a real crash would look from node A's side: node B
//! runs on its own `tokio::runtime::Runtime` in a dedicated thread, and
//! dropping that runtime aborts every task it owns (accept loop, heartbeat
//! loop, peer read/write loops), closing every socket node B held.

mod support;

use std::time::Duration;

use async_trait::async_trait;
use grove_runtime::{start, Behavior, Observer, StartOpts};
use grove_shared::ExitReason;
use tokio::sync::oneshot;

use support::{node_id, start_node, wait_connected};

struct Noop;

#[async_trait]
impl Behavior for Noop {
    type State = ();
    type InitArg = ();
    type CallMsg = ();
    type CastMsg = ();
    type Reply = ();

    async fn init(&mut self, _arg: ()) -> Result<(), String> {
        Ok(())
    }

    async fn handle_call(&mut self, _msg: (), state: ()) -> ((), ()) {
        ((), state)
    }

    async fn handle_cast(&mut self, _msg: (), state: ()) -> () {
        state
    }
}

/// Spin up a throwaway node on its own runtime/thread and return a sender
/// that kills it (by dropping that runtime) when signalled.
fn spawn_disposable_node(name: &'static str, port: u16) -> oneshot::Sender<()> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    let (kill_tx, kill_rx) = oneshot::channel::<()>();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("node thread runtime");
        rt.block_on(async move {
            let node = start_node(name, port, Vec::new()).await.expect("node should start");
            node.behaviors.register::<Noop, _>("noop", || Noop).unwrap();
            let _ = ready_tx.send(());
            let _ = kill_rx.await;
        });
        // `rt` drops here, aborting every task it owns and closing its sockets.
    });

    ready_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("node thread did not report ready");
    kill_tx
}

#[tokio::test]
async fn remote_monitor_fires_no_connection_when_the_peer_disconnects() {
    let b_id = node_id("b", 19302);
    let kill_b = spawn_disposable_node("b", 19302);

    let node_a = start_node("a", 19301, vec![b_id.to_string()]).await.unwrap();
    wait_connected(&node_a, &b_id).await;

    let target = node_a
        .cluster
        .remote_spawn("noop", b_id.clone(), None, None, serde_json::Value::Null)
        .await
        .expect("remote spawn should succeed");

    let watcher = start(&node_a.runtime, Noop, StartOpts::new((), "noop"))
        .await
        .expect("local watcher should start");

    let observer = Observer::new(node_a.runtime.clone());
    let mut events = observer.subscribe();

    node_a
        .cluster
        .remote_monitor(watcher.id(), &target)
        .await
        .expect("remote monitor install should succeed");

    // Kill node B out from under the connection.
    let _ = kill_b.send(());

    let reason = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                grove_runtime::LifecycleEvent::ProcessDown {
                    watcher: w,
                    target: t,
                    reason,
                    ..
                } if w.id() == watcher.id() && t.id() == target.id() => {
                    return reason;
                }
                _ => continue,
            }
        }
    })
    .await
    .expect("expected a process_down event for the remote monitor");

    assert!(matches!(reason, ExitReason::NoConnection));
}

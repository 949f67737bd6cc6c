//! Forks real processes, so everything lives in one test: `waitpid(-1)`
//! would otherwise reap children belonging to a concurrently running test.

use std::time::{Duration, Instant};

use prefork_server::supervisor::{Event, ExitStatus, ForkControl, ProcessControl};

#[test]
fn fork_control_reaps_children_and_times_out() {
    let mut code = 0;
    let mut control = ForkControl::new(None, || {
        code += 7;
        code
    })
    .unwrap();

    let pid = control.spawn().unwrap();
    let event = control.next_event(Some(Duration::from_secs(10))).unwrap();
    assert_eq!(event, Some(Event::Exited { pid, status: ExitStatus::Code(7) }));

    let start = Instant::now();
    assert_eq!(control.next_event(Some(Duration::from_millis(120))).unwrap(), None);
    assert!(start.elapsed() >= Duration::from_millis(120));
}

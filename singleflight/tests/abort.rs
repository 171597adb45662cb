use std::env;
use std::process::Command;
use std::thread;
use std::time::Duration;

use singleflight::Group;

const CHILD: &str = "SINGLEFLIGHT_ABORT_CHILD";

// Runs itself again in a child process, where the panic must take the whole
// process down instead of being caught by the test harness.
#[test]
fn panic_with_channel_waiter_aborts() {
    if env::var_os(CHILD).is_some() {
        let group: Group<u8, u8, ()> = Group::new();
        let rx = group.work_chan(1, || panic!("boom"));
        let _ = rx.blocking_recv();
        thread::sleep(Duration::from_secs(10));
        return;
    }

    let output = Command::new(env::current_exe().unwrap())
        .args(["panic_with_channel_waiter_aborts", "--exact", "--nocapture"])
        .env(CHILD, "1")
        .output()
        .unwrap();
    assert!(!output.status.success());

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(output.status.signal(), Some(6));
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("panic: boom"));
}

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl Session {
    fn start(flags: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_shell"))
            .args(flags)
            .env_remove("RUST_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to start the shell");
        let stdin = child.stdin.take();
        Session { child, stdin }
    }

    fn quiet() -> Self {
        Self::start(&["-p"])
    }

    fn send(&mut self, line: &str) -> &mut Self {
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        writeln!(stdin, "{line}").unwrap();
        stdin.flush().unwrap();
        self
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        stdin.write_all(bytes).unwrap();
        stdin.flush().unwrap();
        self
    }

    fn pause(&mut self, millis: u64) -> &mut Self {
        sleep(Duration::from_millis(millis));
        self
    }

    fn signal(&mut self, signal: Signal) -> &mut Self {
        kill(Pid::from_raw(self.child.id() as i32), signal).unwrap();
        self
    }

    fn finish(mut self) -> (ExitStatus, String) {
        drop(self.stdin.take());
        let output = self.child.wait_with_output().unwrap();
        (output.status, String::from_utf8(output.stdout).unwrap())
    }
}

fn scratch_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("shell-jobs-{}-{name}", std::process::id()))
}

#[test]
fn test_background_job_is_listed_then_reaped() {
    let mut sh = Session::quiet();
    sh.send("sleep 1 &").pause(300).send("jobs").pause(1700).send("jobs");
    let (status, out) = sh.finish();
    assert!(status.success());

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2, "unexpected output: {out:?}");
    assert!(lines[0].starts_with("[1] ("));
    assert!(lines[0].ends_with(") sleep 1 &"));
    assert!(lines[1].starts_with("[1] ("));
    assert!(lines[1].ends_with(") Running sleep 1 &"));
}

#[test]
fn test_foreground_job_is_waited_for() {
    let mut sh = Session::quiet();
    sh.send("false").send("jobs");
    let (status, out) = sh.finish();
    assert!(status.success());
    assert_eq!(out, "");
}

#[test]
fn test_redirections_round_trip_through_a_file() {
    let file = scratch_file("redirect.txt");
    let path = file.display();
    let mut sh = Session::quiet();
    sh.send(&format!("echo hi > {path}"))
        .send(&format!("cat < {path}"))
        .send(&format!("echo there >> {path}"))
        .send(&format!("cat {path}"));
    let (_, out) = sh.finish();
    let _ = std::fs::remove_file(&file);
    assert_eq!(out, "hi\nhi\nthere\n");
}

#[test]
fn test_pipeline_runs_to_completion_outside_the_table() {
    let mut sh = Session::quiet();
    sh.send("echo a b c | wc -w").send("jobs");
    let (status, out) = sh.finish();
    assert!(status.success());
    assert_eq!(out.trim(), "3");
}

#[test]
fn test_three_stage_pipeline() {
    let mut sh = Session::quiet();
    sh.send("printf 'b\\na\\nb\\n' | sort | uniq");
    let (_, out) = sh.finish();
    assert_eq!(out, "a\nb\n");
}

#[test]
fn test_unknown_program_is_reported_by_its_child() {
    let mut sh = Session::quiet();
    sh.send("no-such-program-here").send("jobs");
    let (status, out) = sh.finish();
    assert!(status.success());
    assert_eq!(out, "no-such-program-here: Command not found\n");
}

#[test]
fn test_builtin_argument_errors() {
    let mut sh = Session::quiet();
    sh.send("fg %9").send("bg").send("fg x1").send("bg 999999");
    let (_, out) = sh.finish();
    assert_eq!(
        out,
        "%9: No such job\n\
         bg command requires PID or %jobid argument\n\
         fg: argument must be a PID or %jobid\n\
         (999999): No such process\n"
    );
}

#[test]
fn test_quit_stops_reading() {
    let mut sh = Session::quiet();
    sh.send("quit").send("echo unreachable");
    let (status, out) = sh.finish();
    assert!(status.success());
    assert_eq!(out, "");
}

#[test]
fn test_prompt_is_printed_without_a_terminal() {
    let mut sh = Session::start(&[]);
    sh.send("echo hi");
    let (status, out) = sh.finish();
    assert!(status.success());
    assert_eq!(out, "tsh> hi\ntsh> ");
}

#[test]
fn test_help_refuses_to_start() {
    let (status, out) = Session::start(&["-h"]).finish();
    assert_eq!(status.code(), Some(1));
    assert!(out.contains("--verbose"));
}

#[test]
fn test_verbose_echoes_added_jobs() {
    let mut sh = Session::start(&["-vp"]);
    sh.send("true");
    let (_, out) = sh.finish();
    assert!(out.starts_with("Added job [1] "), "unexpected output: {out:?}");
    assert!(out.trim_end().ends_with(" true"));
}

#[test]
fn test_interrupt_reaches_the_foreground_job() {
    let mut sh = Session::quiet();
    sh.send("sleep 30").pause(300).signal(Signal::SIGINT).pause(300).send("jobs");
    let (status, out) = sh.finish();
    assert!(status.success());

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 1, "unexpected output: {out:?}");
    assert!(lines[0].starts_with("Job [1] ("));
    assert!(lines[0].ends_with(&format!(") terminated by signal {}", Signal::SIGINT as i32)));
}

#[test]
fn test_stopped_job_resumes_in_background() {
    let mut sh = Session::quiet();
    sh.send("sleep 2")
        .pause(300)
        .signal(Signal::SIGTSTP)
        .pause(300)
        .send("jobs")
        .send("bg %1")
        .send("jobs")
        .send("fg %1");
    let (status, out) = sh.finish();
    assert!(status.success());

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 4, "unexpected output: {out:?}");
    assert!(lines[0].ends_with(&format!(") stopped by signal {}", Signal::SIGTSTP as i32)));
    assert!(lines[1].ends_with(") Stopped sleep 2"));
    assert!(lines[2].starts_with("[1] ("));
    assert!(lines[2].ends_with(") sleep 2"));
    assert!(lines[3].ends_with(") Running sleep 2"));
}

#[test]
fn test_interrupt_without_foreground_job_is_ignored() {
    let mut sh = Session::quiet();
    sh.pause(300).signal(Signal::SIGINT).pause(100).send("echo alive");
    let (status, out) = sh.finish();
    assert!(status.success());
    assert_eq!(out, "alive\n");
}

#[test]
fn test_sigquit_terminates_the_shell() {
    let mut sh = Session::quiet();
    sh.pause(300).signal(Signal::SIGQUIT);
    let (status, out) = sh.finish();
    assert_eq!(status.code(), Some(1));
    assert_eq!(out, "Terminating after receipt of SIGQUIT signal\n");
}

#[test]
fn test_invalid_utf8_line_does_not_end_the_shell() {
    let mut sh = Session::quiet();
    sh.send_bytes(b"echo \xff\n").send("echo after");
    let (status, out) = sh.finish();
    assert!(status.success());
    assert!(out.ends_with("after\n"), "unexpected output: {out:?}");
}

#[test]
fn test_diagnostics_stay_off_the_output_stream() {
    let mut sh = Session::quiet();
    sh.send("echo a | cat &");
    let (status, out) = sh.finish();
    assert!(status.success());
    assert_eq!(out, "a\n");
}

#[test]
fn test_interrupt_reaches_pipeline_after_its_leader_exits() {
    let started = Instant::now();
    let mut sh = Session::quiet();
    sh.send("true | sleep 5")
        .pause(300)
        .signal(Signal::SIGINT)
        .send("echo back");
    let (status, out) = sh.finish();
    assert!(status.success());
    assert_eq!(out, "back\n");
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "pipeline outlived the interrupt: {:?}",
        started.elapsed()
    );
}

//! End-to-end tests of the supervisor lifecycle.

use assert_matches::assert_matches;
use cradle::{Error, LifecycleState, Supervisor, SupervisorConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;

static LOCK: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn shell(script: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

/// Configuration with hooks and env loading switched off.
fn bare_config(command: Vec<String>) -> SupervisorConfig {
    SupervisorConfig {
        skip_preinit: true,
        skip_postinit: true,
        skip_env: true,
        command,
        ..Default::default()
    }
}

/// Log sink shared between the subscriber and the test.
#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl CaptureWriter {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn count(states: &[LifecycleState], state: LifecycleState) -> usize {
    states.iter().filter(|s| **s == state).count()
}

#[tokio::test]
async fn test_empty_command_is_fatal() {
    let _guard = serial();
    let result = Supervisor::new(bare_config(vec![])).run().await;

    assert_matches!(result, Err(Error::NoCommand));
    assert!(result.unwrap_err().is_fatal());
}

#[tokio::test]
async fn test_spawn_failure_is_fatal() {
    let _guard = serial();
    let config = bare_config(vec!["/nonexistent/cradle/main".to_string()]);

    let result = Supervisor::new(config).run().await;

    assert_matches!(result, Err(Error::SpawnFailed { ref command, .. }) if command == "/nonexistent/cradle/main");
}

#[tokio::test]
async fn test_exit_status_is_observed() {
    let _guard = serial();
    let outcome = Supervisor::new(bare_config(shell("exit 7")))
        .run()
        .await
        .unwrap();

    let status = outcome.status.expect("wait should succeed");
    assert_eq!(status.code, Some(7));
    assert_eq!(outcome.wait_error, None);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.hooks_run, 0);
    assert_eq!(count(&outcome.states, LifecycleState::MainStarting), 1);
    assert_eq!(count(&outcome.states, LifecycleState::Exited), 1);
    assert_eq!(
        outcome.states,
        vec![
            LifecycleState::Init,
            LifecycleState::MainStarting,
            LifecycleState::Waiting,
            LifecycleState::Exited,
        ]
    );
}

#[tokio::test]
async fn test_start_and_exit_are_logged_once() {
    let _guard = serial();
    let capture = CaptureWriter::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let outcome = Supervisor::new(bare_config(shell("exit 7")))
        .run()
        .await
        .unwrap();
    assert_eq!(outcome.status.unwrap().code, Some(7));

    let logs = capture.contents();
    assert_eq!(logs.matches("Started main command").count(), 1, "{}", logs);
    assert_eq!(logs.matches("Main command exited").count(), 1, "{}", logs);
    assert_eq!(logs.matches("Hook").count(), 0, "{}", logs);
    assert!(logs.contains("status"), "{}", logs);
}

#[tokio::test]
async fn test_full_lifecycle_with_hooks_and_env() {
    let _guard = serial();
    let preinit = TempDir::new().unwrap();
    let postinit = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();

    let pre_marker = work.path().join("pre");
    let post_marker = work.path().join("post");
    let main_out = work.path().join("main.out");
    let env_file = work.path().join("env");
    std::fs::write(&env_file, "CRADLE_E2E_VAR=from-env-file\n").unwrap();

    write_script(
        preinit.path(),
        "10-pre",
        &format!("echo \"$CRADLE_E2E_VAR\" > {}", pre_marker.display()),
    );
    write_script(
        postinit.path(),
        "10-post",
        &format!("touch {}", post_marker.display()),
    );

    // The main command fails unless the pre-init hook already ran.
    let script = format!(
        "test -f {} || exit 1; echo \"$CRADLE_E2E_VAR\" > {}",
        pre_marker.display(),
        main_out.display()
    );
    let config = SupervisorConfig {
        preinit_dir: preinit.path().to_path_buf(),
        postinit_dir: postinit.path().to_path_buf(),
        env_file,
        command: shell(&script),
        ..Default::default()
    };

    let outcome = Supervisor::new(config).run().await.unwrap();

    assert_eq!(outcome.status.unwrap().code, Some(0));
    assert_eq!(outcome.hooks_run, 2);
    assert_eq!(
        outcome.states,
        vec![
            LifecycleState::Init,
            LifecycleState::PreInitRunning,
            LifecycleState::MainStarting,
            LifecycleState::PostInitRunning,
            LifecycleState::Waiting,
            LifecycleState::Exited,
        ]
    );
    assert_eq!(
        std::fs::read_to_string(&pre_marker).unwrap().trim(),
        "from-env-file"
    );
    assert_eq!(
        std::fs::read_to_string(&main_out).unwrap().trim(),
        "from-env-file"
    );
    assert!(post_marker.exists());
}

#[tokio::test]
async fn test_missing_hook_directories_are_not_fatal() {
    let _guard = serial();
    let config = SupervisorConfig {
        preinit_dir: PathBuf::from("/nonexistent/cradle/preinit.d"),
        postinit_dir: PathBuf::from("/nonexistent/cradle/postinit.d"),
        env_file: PathBuf::from("/nonexistent/cradle/env"),
        command: shell("exit 0"),
        ..Default::default()
    };

    let outcome = Supervisor::new(config).run().await.unwrap();

    assert_eq!(outcome.status.unwrap().code, Some(0));
    assert_eq!(outcome.hooks_run, 0);
    assert_eq!(count(&outcome.states, LifecycleState::PreInitRunning), 1);
    assert_eq!(count(&outcome.states, LifecycleState::PostInitRunning), 1);
}

#[tokio::test]
async fn test_skip_env_ignores_env_file() {
    let _guard = serial();
    let work = TempDir::new().unwrap();
    let env_file = work.path().join("env");
    std::fs::write(&env_file, "CRADLE_SKIPPED_VAR=present\n").unwrap();

    let config = SupervisorConfig {
        env_file,
        ..bare_config(shell("test -z \"$CRADLE_SKIPPED_VAR\""))
    };

    let outcome = Supervisor::new(config).run().await.unwrap();
    assert_eq!(outcome.status.unwrap().code, Some(0));
}

#[tokio::test]
async fn test_failing_hook_does_not_stop_main() {
    let _guard = serial();
    let preinit = TempDir::new().unwrap();
    write_script(preinit.path(), "10-broken", "exit 42");

    let config = SupervisorConfig {
        skip_preinit: false,
        preinit_dir: preinit.path().to_path_buf(),
        ..bare_config(shell("exit 0"))
    };

    let outcome = Supervisor::new(config).run().await.unwrap();
    assert_eq!(outcome.hooks_run, 1);
    assert_eq!(outcome.status.unwrap().code, Some(0));
}

// process_lock.rs - Single-process guard keyed by the database path
//
// Lock file: <db_path>.lock containing "pid<TAB>unix_seconds\n". Start is
// refused while the recorded PID is alive; a stale or unreadable lock is
// overwritten. Only the loop mode takes this lock.

use std::path::PathBuf;

use crate::logger::{ log, LogTag };

/// <db_path>.lock next to the database file.
pub fn lock_path(db_path: &str) -> PathBuf {
    PathBuf::from(format!("{}.lock", db_path))
}

#[cfg(unix)]
fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: i32) -> bool {
    // No cheap liveness probe here; treat every lock as stale.
    false
}

fn read_lock_pid(path: &PathBuf) -> Option<i32> {
    let raw = std::fs::read_to_string(path).ok()?;
    raw.trim().split('\t').next()?.parse::<i32>().ok()
}

/// Try to take the lock for this database. Returns true when acquired,
/// false when another live process holds it or the file cannot be written.
pub fn try_acquire_db_lock(db_path: &str) -> bool {
    let path = lock_path(db_path);
    let my_pid = std::process::id() as i32;
    let ts = chrono::Utc::now().timestamp();

    if path.exists() {
        if let Some(old_pid) = read_lock_pid(&path) {
            if pid_alive(old_pid) {
                return false;
            }
        }
        // Stale or unreadable: overwrite below.
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log(LogTag::System, "WARN", &format!("Failed to create lock dir: {}", e));
                return false;
            }
        }
    }
    match std::fs::write(&path, format!("{}\t{}\n", my_pid, ts)) {
        Ok(()) => true,
        Err(e) => {
            log(LogTag::System, "WARN", &format!("Failed to write lock file {:?}: {}", path, e));
            false
        }
    }
}

/// Remove the lock only if it still records this process's PID.
pub fn release_db_lock(db_path: &str) {
    let path = lock_path(db_path);
    if !path.exists() {
        return;
    }
    let my_pid = std::process::id() as i32;
    if read_lock_pid(&path) == Some(my_pid) {
        let _ = std::fs::remove_file(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db_path(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("solscreener-lock-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("test.sqlite").to_string_lossy().to_string()
    }

    #[test]
    fn acquire_then_refuse_then_release() {
        let db = temp_db_path("basic");
        assert!(try_acquire_db_lock(&db));
        // Our own PID is alive, so a second acquire is refused.
        assert!(!try_acquire_db_lock(&db));
        release_db_lock(&db);
        assert!(!lock_path(&db).exists());
        assert!(try_acquire_db_lock(&db));
        release_db_lock(&db);
    }

    #[test]
    fn stale_lock_is_overwritten() {
        let db = temp_db_path("stale");
        std::fs::write(lock_path(&db), "garbage contents").unwrap();
        assert!(try_acquire_db_lock(&db));
        let content = std::fs::read_to_string(lock_path(&db)).unwrap();
        let pid: i32 = content.trim().split('\t').next().unwrap().parse().unwrap();
        assert_eq!(pid, std::process::id() as i32);
        assert!(content.ends_with('\n'));
        release_db_lock(&db);
    }

    #[test]
    fn release_leaves_foreign_locks_alone() {
        let db = temp_db_path("foreign");
        std::fs::write(lock_path(&db), "1\t0\n").unwrap();
        release_db_lock(&db);
        assert!(lock_path(&db).exists());
        std::fs::remove_file(lock_path(&db)).unwrap();
    }
}

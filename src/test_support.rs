//! Fake `git` executables for exercising subprocess code paths without a
//! real Git installation.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Behaves enough like git for the gateway:
///
/// - `init --bare <path>` creates `<path>/HEAD` and appends to `init.log`
///   next to the script.
/// - `<service> --stateless-rpc --advertise-refs <path>` prints a fixed
///   advertisement naming the service and path.
/// - `<service> --stateless-rpc <path>` echoes stdin to stdout and writes a
///   diagnostic line to stderr.
const FAKE_GIT: &str = r#"#!/bin/sh
dir=$(dirname "$0")
case "$1" in
  init)
    echo init >> "$dir/init.log"
    mkdir -p "$3" && printf 'ref: refs/heads/main\n' > "$3/HEAD"
    ;;
  upload-pack|receive-pack)
    if [ "$3" = "--advertise-refs" ]; then
      printf 'ADVERTISE %s %s\n' "$1" "$GIT_PROTOCOL"
    else
      echo "fake git diagnostic" >&2
      cat
    fi
    ;;
  *)
    echo "unsupported: $*" >&2
    exit 1
    ;;
esac
"#;

const FAILING_GIT: &str = r#"#!/bin/sh
echo "fatal: cannot init" >&2
exit 128
"#;

/// `git` that answers immediately without reading its input.
const EARLY_EXIT_GIT: &str = r#"#!/bin/sh
printf 'bye'
exit 0
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

pub fn fake_git(dir: &Path) -> PathBuf {
    write_script(dir, "fake-git", FAKE_GIT)
}

pub fn failing_git(dir: &Path) -> PathBuf {
    write_script(dir, "failing-git", FAILING_GIT)
}

pub fn early_exit_git(dir: &Path) -> PathBuf {
    write_script(dir, "early-exit-git", EARLY_EXIT_GIT)
}

/// Number of `init` invocations recorded by [`fake_git`] in `dir`.
pub fn init_count(dir: &Path) -> usize {
    fs::read_to_string(dir.join("init.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

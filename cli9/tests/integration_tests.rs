//! Integration tests for cli9
//!
//! Two harnesses:
//! 1. Every `.cli9` script under tests/integration/scripts runs in a fresh
//!    shell and its rendered output is compared with the `.out` file next
//!    to it.
//! 2. Scenarios that need several callers, live processes or direct
//!    filesystem access are plain async tests below.

use cli9::{ScopeKey, Shell};
use cli9_config::Cli9Config;
use cli9_core::Node;
use cli9_sdk::{Caller, Mode, ShellError, ValueStream};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const USER: u64 = 333_333_333_333_333_333;

async fn shell() -> Arc<Shell> {
    Shell::builder().build().await.unwrap()
}

async fn run(shell: &Arc<Shell>, text: &str) -> ValueStream {
    shell.execute(Caller::user(USER), text).await
}

/// Discover all .cli9 test scripts
fn discover_test_scripts() -> Vec<PathBuf> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let scripts_dir = manifest_dir.join("tests/integration/scripts");

    let mut scripts = Vec::new();
    if let Ok(entries) = fs::read_dir(&scripts_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "cli9") {
                scripts.push(path);
            }
        }
    }

    scripts.sort();
    scripts
}

fn indent(s: &str, prefix: &str) -> String {
    s.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn integration_scripts() {
    let scripts = discover_test_scripts();
    assert!(!scripts.is_empty(), "no scripts in tests/integration/scripts/");

    let mut failed = Vec::new();
    for script in &scripts {
        let name = script.file_stem().unwrap().to_string_lossy().to_string();
        let source = fs::read_to_string(script).unwrap();
        let expected = fs::read_to_string(script.with_extension("out"))
            .unwrap_or_else(|_| panic!("missing expected output for {name}"));

        let actual = run(&shell().await, &source).await.render();
        if actual.trim_end() == expected.trim_end() {
            println!("{name}... PASSED");
        } else {
            println!("{name}... FAILED");
            println!("  Expected:\n{}", indent(&expected, "    "));
            println!("  Actual:\n{}", indent(&actual, "    "));
            failed.push(name);
        }
    }

    assert!(failed.is_empty(), "scripts failed: {failed:?}");
}

#[tokio::test]
async fn and_list_stops_at_first_failure() {
    let shell = shell().await;
    let out = run(&shell, "true && false && true").await;
    assert_eq!(out.errors().count(), 1);
    assert_eq!(out.errors().next(), Some(&ShellError::False));

    let out = run(&shell, "false || echo rescued; echo always").await;
    assert_eq!(out.text(), "rescued\nalways");
}

#[tokio::test]
async fn pipelines_feed_whole_output() {
    let shell = shell().await;
    assert_eq!(run(&shell, "echo hello | cat").await.text(), "hello");
    assert_eq!(run(&shell, "echo a | echo b | cat").await.text(), "b");
    run(&shell, "echo kept > saved").await;
    assert_eq!(run(&shell, "cat < saved").await.text(), "kept");
    run(&shell, "echo more >> saved").await;
    assert_eq!(run(&shell, "cat saved").await.text(), "kept\nmore");
}

#[tokio::test]
async fn loops_and_limits() {
    let shell = shell().await;
    assert_eq!(
        run(&shell, "for x in 1:5; do echo $x; done").await.text(),
        "1\n2\n3\n4\n5"
    );
    assert_eq!(
        run(&shell, "for x in a b c; do if [ $x == b ]; then break; fi; echo $x; done")
            .await
            .text(),
        "a"
    );

    let mut config = Cli9Config::default();
    config.limits.max_iterations = 3;
    let limited = Shell::builder().config(config).build().await.unwrap();
    let out = run(&limited, "while true; do echo x; done").await;
    assert!(matches!(
        out.errors().next(),
        Some(ShellError::LimitExceeded { .. })
    ));
}

#[tokio::test]
async fn functions_return_early() {
    let shell = shell().await;
    let out = run(
        &shell,
        "f() { echo first; return $1; echo never; }\nf last",
    )
    .await;
    assert_eq!(out.text(), "first\nlast");
    assert!(!out.has_errors());

    let out = run(&shell, "g() { [ return 6 * 7 ]; }\ng").await;
    assert_eq!(out.text(), "42");
}

#[tokio::test]
async fn runaway_recursion_becomes_an_error() {
    let shell = shell().await;
    let out = run(&shell, "f() { f; }\nf").await;
    assert!(out
        .errors()
        .any(|e| matches!(e, ShellError::LimitExceeded { .. })));
    assert_eq!(run(&shell, "echo still here").await.text(), "still here");

    let mut config = Cli9Config::default();
    config.limits.max_nesting = 2;
    let shallow = Shell::builder().config(config).build().await.unwrap();
    let defs = "a() { b; }\nb() { echo deep; }\nc() { a; }\n";
    assert_eq!(run(&shallow, &format!("{defs}a")).await.text(), "deep");
    let out = run(&shallow, &format!("{defs}c")).await;
    assert!(out
        .errors()
        .any(|e| matches!(e, ShellError::LimitExceeded { .. })));
}

#[tokio::test]
async fn assignments_bind_variables() {
    let shell = shell().await;
    assert_eq!(run(&shell, "x=hi; echo $x").await.text(), "hi");
    assert_eq!(run(&shell, "x=hi; x+=there; echo $x").await.text(), "hithere");
    assert_eq!(
        run(&shell, "greeting='hello world'; echo $greeting").await.text(),
        "hello world"
    );
    let out = run(&shell, "n=0; until [ $n == 3 ]; do n=$([ return $n + 1 ]); done; echo $n").await;
    assert_eq!(out.text(), "3");
}

#[tokio::test]
async fn aliases_take_extra_arguments() {
    let shell = shell().await;
    run(&shell, "alias greet='echo hello'").await;
    assert_eq!(run(&shell, "greet world").await.text(), "hello world");

    run(&shell, "alias loop=loop").await;
    let out = run(&shell, "loop").await;
    assert!(out.errors().next().is_some());
}

#[tokio::test]
async fn expressions_in_conditions() {
    let shell = shell().await;
    assert_eq!(
        run(&shell, "if [ 2 \\> 1 ]; then echo yes; else echo no; fi").await.text(),
        "yes"
    );
    assert_eq!(run(&shell, "[ return 7 // 2 ]").await.text(), "3");
    assert_eq!(run(&shell, "[ return 'ab' * 2 ]").await.text(), "abab");
    assert_eq!(
        run(&shell, "n=5; [ return $n + 1 ]").await.text(),
        "6"
    );

    let out = run(&shell, "[ return 'a' * 9223372036854775807 ]").await;
    assert!(out
        .errors()
        .any(|e| matches!(e, ShellError::LimitExceeded { .. })));
    assert_eq!(run(&shell, "[ return -9223372036854775808 ]").await.text(), "-9223372036854775808");
}

#[tokio::test]
async fn filter_segments_select_entries() {
    let shell = shell().await;
    run(&shell, "touch a.txt b.txt c.md; mkdir dir").await;
    assert_eq!(
        run(&shell, "ls -E %type=file%range=0:2").await.text(),
        "a.txt\nb.txt"
    );
    assert_eq!(run(&shell, "ls -E %type=directory").await.text(), "dir");
}

#[tokio::test]
async fn permissions_follow_owner_and_group() {
    let shell = shell().await;
    let owner = 444_444_444_444_444_444;
    let guild = 555_555_555_555_555_555;
    let vfs = shell.vfs();
    let root = vfs.root();
    vfs.create(
        &root,
        "secret",
        Node::file("", Mode::root(), "classified"),
        Some(Mode::new(0o640, owner, "member")),
        &Caller::system(),
    )
    .await
    .unwrap();

    let member = Caller::member(USER, guild);
    assert_eq!(shell.execute(member.clone(), "cat /secret").await.text(), "classified");
    let out = shell.execute(member, "write /secret changed").await;
    assert!(matches!(
        out.errors().next(),
        Some(ShellError::PermissionDenied { action, .. }) if action == "write"
    ));

    let stranger = shell.execute(Caller::user(USER), "cat /secret").await;
    assert!(matches!(
        stranger.errors().next(),
        Some(ShellError::PermissionDenied { action, .. }) if action == "read"
    ));

    let out = shell.execute(Caller::user(owner), "write /secret changed; cat /secret").await;
    assert_eq!(out.text(), "changed");
}

#[tokio::test]
async fn processes_can_be_listed_and_killed() {
    let shell = shell().await;
    let caller = Caller::user(USER);
    let sleeper = shell.spawn(caller.clone(), "sleep 30; echo woke");
    let pid = sleeper.pid;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let listed = shell.execute(caller.clone(), "ps").await.text();
    assert!(listed.contains(&format!("{pid}: sleep 30; echo woke")));

    let killed = shell.execute(caller.clone(), &format!("kill {pid}")).await;
    assert!(killed.text().starts_with(&format!("Process killed: [{pid}]")));
    assert!(sleeper.wait().await.is_empty());

    let scope = shell.scope(ScopeKey::of(&caller));
    assert!(scope.processes().list().iter().all(|p| p.pid != pid));
}

#[tokio::test]
async fn read_takes_the_next_line() {
    let shell = shell().await;
    let caller = Caller::user(USER);
    let reader = shell.spawn(caller.clone(), "read -t 5 name; echo hello $name");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(shell.execute(caller.clone(), "ada").await.is_empty());
    assert_eq!(reader.wait().await.text(), "hello ada");
    assert_eq!(shell.execute(caller, "echo after").await.text(), "after");
}

#[tokio::test]
async fn scopes_are_separate_per_caller() {
    let shell = shell().await;
    run(&shell, "export shared=mine").await;
    let other = shell
        .execute(Caller::user(666_666_666_666_666_666), "echo $shared")
        .await;
    assert_eq!(other.text(), "");
    assert_eq!(run(&shell, "echo $shared").await.text(), "mine");

    let rc = run(&shell, "cat /scripts/.clirc").await;
    assert!(rc.text().contains("alias ll='ls -l'"));
}

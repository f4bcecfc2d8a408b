//! `%key=value%...` views over a directory.
//!
//! Selecting `%type=file%range=0:2` in a directory yields a filter node
//! listing the matching names; `%...%return` and `%...%random` select one
//! match directly.

use cli9_sdk::{Caller, Segment, ShellError, ShellResult, Value};
use rand::seq::SliceRandom;
use regex::Regex;
use std::sync::Arc;

use crate::node::{Body, Kind, Node};
use crate::path::{split_unescaped, Path, Target};
use crate::vfs::Vfs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    First,
    Random,
}

/// Apply the filter `selector` (leading `%` included) to the directory `dir`.
pub async fn apply(vfs: &Vfs, dir: &Path, selector: &str, caller: &Caller) -> ShellResult<Path> {
    let mut prev = dir.clone();
    if vfs.node(&prev).await?.kind == Kind::Generator {
        prev = vfs.cache(&prev, caller).await?;
    }
    let mut files = vfs.names(&prev, caller).await?;
    let mut pick = None;

    let body = selector.strip_prefix('%').unwrap_or(selector);
    for pattern in split_unescaped(body, '%') {
        match pattern.as_str() {
            "return" if pick.is_none() => pick = Some(Pick::First),
            "random" if pick.is_none() => pick = Some(Pick::Random),
            _ => {
                let (key, value) = pattern.split_once('=').ok_or_else(|| {
                    ShellError::parsing(format!("Invalid filter {pattern:?}: expected key=value"))
                })?;
                files = match key {
                    "name" => by_name(value, files)?,
                    "range" => by_range(value, files)?,
                    "type" => by_type(vfs, &prev, value, files, caller).await?,
                    "inside" => by_inside(vfs, &prev, value, files, caller).await?,
                    "relative" => by_relative(value, files),
                    other => {
                        return Err(ShellError::parsing(format!("Unknown filter {other:?}")));
                    }
                };
            }
        }
    }

    if let Some(pick) = pick {
        let chosen = match pick {
            Pick::First => files.first(),
            Pick::Random => files.choose(&mut rand::thread_rng()),
        }
        .ok_or_else(|| ShellError::no_file_found(selector))?;
        return select_from(vfs, &prev, chosen, caller).await;
    }

    let prev_node = vfs.node(&prev).await?;
    tracing::trace!(selector, matched = files.len(), "applied filter");
    let view = Node::new(
        Kind::Filter,
        selector,
        prev_node.mode.clone(),
        Body::Filter {
            files,
            prev: prev.clone(),
        },
    );
    Ok(prev.join(selector, Target::Ephemeral(Arc::new(view))))
}

async fn select_from(vfs: &Vfs, prev: &Path, name: &str, caller: &Caller) -> ShellResult<Path> {
    if name.contains('/') {
        vfs.resolve(name, prev, caller).await
    } else {
        vfs.select(prev, name, caller).await
    }
}

fn by_name(pattern: &str, files: Vec<String>) -> ShellResult<Vec<String>> {
    let compiled = Regex::new(&format!("^(?:{pattern})"))
        .map_err(|e| ShellError::parsing(format!("Invalid name pattern: {e}")))?;
    Ok(files.into_iter().filter(|f| compiled.is_match(f)).collect())
}

fn by_range(range: &str, files: Vec<String>) -> ShellResult<Vec<String>> {
    let segment = Segment::parse(range)?;
    let list = Value::List(files.into_iter().map(Value::Str).collect());
    let picked = segment.get(&list).map_err(|_| ShellError::no_file_found(range))?;
    Ok(match picked {
        Value::List(items) => items.into_iter().map(|v| v.to_string()).collect(),
        single => vec![single.to_string()],
    })
}

async fn by_type(
    vfs: &Vfs,
    prev: &Path,
    kind: &str,
    files: Vec<String>,
    caller: &Caller,
) -> ShellResult<Vec<String>> {
    let mut kept = Vec::new();
    for name in files {
        let path = select_from(vfs, prev, &name, caller).await?;
        if vfs.node(&path).await?.kind.tag().contains(kind) {
            kept.push(name);
        }
    }
    Ok(kept)
}

async fn by_inside(
    vfs: &Vfs,
    prev: &Path,
    inside: &str,
    files: Vec<String>,
    caller: &Caller,
) -> ShellResult<Vec<String>> {
    let (filename, expected) = if let Some((f, v)) = inside.split_once("!=") {
        (f, Some((v, false)))
    } else if let Some((f, v)) = inside.split_once("==") {
        (f, Some((v, true)))
    } else {
        (inside, None)
    };

    let mut kept = Vec::new();
    for name in files {
        let path = select_from(vfs, prev, &name, caller).await?;
        let inner = match vfs.select(&path, filename, caller).await {
            Ok(inner) => inner,
            Err(e) if e.is_not_found() || matches!(e, ShellError::NotADirectory(_)) => continue,
            Err(e) => return Err(e),
        };
        if let Some((value, truth)) = expected {
            let Ok(content) = vfs.read(&inner, caller).await else {
                continue;
            };
            if (content.to_string() == value) != truth {
                continue;
            }
        }
        kept.push(name);
    }
    Ok(kept)
}

fn by_relative(filename: &str, files: Vec<String>) -> Vec<String> {
    match filename.strip_prefix('^') {
        Some(prefix) => files.into_iter().map(|n| format!("{prefix}/{n}")).collect(),
        None => files.into_iter().map(|n| format!("{n}/{filename}")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{mount, Bootstrap};
    use cli9_sdk::Mode;

    const USER: u64 = 111_111_111_111_111_111;

    async fn populated() -> (Arc<Vfs>, Caller, Path) {
        let vfs = Vfs::builder().build().await.unwrap();
        mount(&vfs, Bootstrap::default()).await.unwrap();
        let caller = Caller::user(USER);
        let home = vfs.home("user", &caller).await.unwrap();
        for name in ["a.txt", "b.txt", "c.md"] {
            vfs.create(&home, name, Node::file("", Mode::root(), name), None, &caller)
                .await
                .unwrap();
        }
        let dir = vfs
            .create(&home, "dir", Node::directory("", Mode::root()), None, &caller)
            .await
            .unwrap();
        vfs.create(&dir, "flag", Node::file("", Mode::root(), "on"), None, &caller)
            .await
            .unwrap();
        (vfs, caller, home)
    }

    #[tokio::test]
    async fn type_and_range() {
        let (vfs, caller, home) = populated().await;
        let view = vfs.select(&home, "%type=file%range=0:2", &caller).await.unwrap();
        assert_eq!(
            vfs.names(&view, &caller).await.unwrap(),
            vec!["a.txt".to_string(), "b.txt".to_string()]
        );
        assert_eq!(vfs.node(&view).await.unwrap().kind, Kind::Filter);
        let listed: Vec<String> = vfs
            .list(&view, &caller)
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(listed, vec!["/home/user/a.txt", "/home/user/b.txt"]);

        let only_dirs = vfs.select(&home, "%type=directory", &caller).await.unwrap();
        assert_eq!(vfs.names(&only_dirs, &caller).await.unwrap(), vec!["dir".to_string()]);
    }

    #[tokio::test]
    async fn name_return_and_selection() {
        let (vfs, caller, home) = populated().await;
        let first = vfs.select(&home, "%name=.*\\.md%return", &caller).await.unwrap();
        assert_eq!(first.to_string(), "/home/user/c.md");

        let view = vfs.select(&home, "%name=b", &caller).await.unwrap();
        assert!(vfs.select(&view, "b.txt", &caller).await.is_ok());
        assert!(vfs.select(&view, "a.txt", &caller).await.unwrap_err().is_not_found());
        assert!(vfs.select(&home, "%name=zzz%return", &caller).await.is_err());
    }

    #[tokio::test]
    async fn inside_and_relative() {
        let (vfs, caller, home) = populated().await;
        let view = vfs.select(&home, "%inside=flag==on", &caller).await.unwrap();
        assert_eq!(vfs.names(&view, &caller).await.unwrap(), vec!["dir".to_string()]);
        let none = vfs.select(&home, "%inside=flag!=on", &caller).await.unwrap();
        assert!(vfs.names(&none, &caller).await.unwrap().is_empty());

        let flag = vfs
            .select(&home, "%type=directory%relative=flag%return", &caller)
            .await
            .unwrap();
        assert_eq!(vfs.read(&flag, &caller).await.unwrap(), Value::str("on"));
    }

    #[tokio::test]
    async fn bad_filters_are_rejected() {
        let (vfs, caller, home) = populated().await;
        assert!(matches!(
            vfs.select(&home, "%colour=red", &caller).await.unwrap_err(),
            ShellError::Parsing(_)
        ));
        assert!(matches!(
            vfs.select(&home, "%name=(", &caller).await.unwrap_err(),
            ShellError::Parsing(_)
        ));
    }
}

//! Path string resolution.

use cli9_sdk::{Action, Caller, Mode, ShellError, ShellResult};

use crate::node::Node;
use crate::path::{split_unescaped, Path};
use crate::vfs::Vfs;

/// Options for [`Vfs::resolve_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resolve {
    /// Create missing segments instead of failing.
    pub create: bool,
    /// Require a directory (`Some(true)`) or a file (`Some(false)`).
    pub directory: Option<bool>,
    /// Stop before the last segment and hand back its name unresolved.
    pub last_name: bool,
}

impl Vfs {
    /// Resolve `path` relative to `start`.
    pub async fn resolve(&self, path: &str, start: &Path, caller: &Caller) -> ShellResult<Path> {
        self.resolve_with(path, start, &Resolve::default(), caller)
            .await
            .map(|(path, _)| path)
    }

    /// Resolve `path` relative to `start`. With `last_name`, the returned
    /// path is the containing directory and the final segment comes back as
    /// a name.
    pub async fn resolve_with(
        &self,
        path: &str,
        start: &Path,
        options: &Resolve,
        caller: &Caller,
    ) -> ShellResult<(Path, Option<String>)> {
        let mut parts = split_unescaped(path, '/');
        let absolute = parts.first().is_some_and(String::is_empty) && parts.len() > 1;
        if absolute {
            parts[0] = "/".to_string();
        }
        let mut parts: Vec<String> = parts
            .into_iter()
            .filter(|p| !p.is_empty() && p != ".")
            .collect();
        let last = if options.last_name { parts.pop() } else { None };

        let mut current = start.clone();
        let count = parts.len();
        for (index, part) in parts.iter().enumerate() {
            let is_last = index + 1 == count;
            let node = self.node(&current).await?;
            if node.kind.is_directory() && part != "/" {
                node.mode
                    .check(&caller.principal, Action::Execute, &current.to_string())?;
            }
            current = match self.select(&current, part, caller).await {
                Ok(next) => next,
                Err(e) if e.is_not_found() && options.create => {
                    let directory = !is_last || options.directory == Some(true);
                    let fresh = if directory {
                        Node::directory(part.clone(), Mode::root())
                    } else {
                        Node::file(part.clone(), Mode::root(), "")
                    };
                    self.create(&current, part, fresh, None, caller).await?
                }
                Err(e) => return Err(e),
            };
            let (followed, _) = self.deref(&current, caller).await?;
            current = followed;
        }

        let node = self.node(&current).await?;
        if last.is_none() {
            match options.directory {
                Some(true) if !node.kind.is_directory() => {
                    return Err(ShellError::not_a_directory(current.to_string()));
                }
                Some(false) if !node.kind.is_file() => {
                    return Err(ShellError::not_a_file(current.to_string()));
                }
                _ => {}
            }
        } else if !node.kind.is_directory() {
            return Err(ShellError::not_a_directory(current.to_string()));
        }
        Ok((current, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{mount, Bootstrap};
    use std::sync::Arc;

    const USER: u64 = 111_111_111_111_111_111;

    async fn setup() -> (Arc<Vfs>, Caller, Path) {
        let vfs = Vfs::builder().build().await.unwrap();
        mount(&vfs, Bootstrap::default()).await.unwrap();
        let caller = Caller::user(USER);
        let home = vfs.home("user", &caller).await.unwrap();
        (vfs, caller, home)
    }

    #[tokio::test]
    async fn absolute_and_relative() {
        let (vfs, caller, home) = setup().await;
        assert_eq!(vfs.resolve("/", &home, &caller).await.unwrap(), Path::root());
        assert_eq!(
            vfs.resolve("/home/user", &Path::root(), &caller).await.unwrap().to_string(),
            "/home/user"
        );
        assert_eq!(vfs.resolve("..", &home, &caller).await.unwrap().to_string(), "/home");
        assert_eq!(vfs.resolve("./", &home, &caller).await.unwrap(), home);
        assert_eq!(vfs.resolve("~", &Path::root(), &caller).await.unwrap().to_string(), "/home/user");
    }

    #[tokio::test]
    async fn create_builds_missing_segments() {
        let (vfs, caller, home) = setup().await;
        let options = Resolve {
            create: true,
            ..Resolve::default()
        };
        let (file, _) = vfs
            .resolve_with("a/b/c.txt", &home, &options, &caller)
            .await
            .unwrap();
        assert_eq!(file.to_string(), "/home/user/a/b/c.txt");
        assert!(vfs.node(&file).await.unwrap().kind.is_file());
        let b = vfs.resolve("a/b", &home, &caller).await.unwrap();
        assert!(vfs.node(&b).await.unwrap().kind.is_directory());

        let err = vfs
            .resolve_with(
                "a/b/c.txt",
                &home,
                &Resolve {
                    directory: Some(true),
                    ..Resolve::default()
                },
                &caller,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn last_name_stops_early() {
        let (vfs, caller, home) = setup().await;
        let options = Resolve {
            last_name: true,
            ..Resolve::default()
        };
        let (dir, name) = vfs
            .resolve_with("/home/user/new", &home, &options, &caller)
            .await
            .unwrap();
        assert_eq!(dir, home);
        assert_eq!(name.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn escaped_slash_is_part_of_a_name() {
        let (vfs, caller, home) = setup().await;
        vfs.create(&home, "a/b", Node::file("", Mode::root(), ""), None, &caller)
            .await
            .unwrap_err();
        assert!(vfs.resolve("x\\/y", &home, &caller).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn missing_paths_fail() {
        let (vfs, caller, home) = setup().await;
        assert!(vfs.resolve("nope/deeper", &home, &caller).await.unwrap_err().is_not_found());
    }
}

//! The default tree every filesystem starts with.

use cli9_sdk::{Caller, Mode, ShellError, ShellResult};
use std::path::Path as FsPath;
use std::sync::Arc;
use tracing::info;

use crate::node::{Body, Kind, Node};
use crate::producer::{CurrentProducer, Lookup, LookupProducer, Producer};
use crate::vfs::Vfs;

/// Pieces of the default tree supplied by the embedding program.
#[derive(Default)]
pub struct Bootstrap {
    /// Producer behind `/bin`, usually listing the registered commands.
    pub bin: Option<Arc<dyn Producer>>,
    /// `(name, text)` pairs placed under `/scripts`.
    pub scripts: Vec<(String, String)>,
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("bin", &self.bin.is_some())
            .field("scripts", &self.scripts.len())
            .finish()
    }
}

fn shared() -> Mode {
    Mode::new(0o755, cli9_sdk::Ident::root(), cli9_sdk::Ident::root())
}

/// Create `/bin`, `/home`, `/get`, `/find`, `/current` and `/scripts`.
pub async fn mount(vfs: &Vfs, setup: Bootstrap) -> ShellResult<()> {
    let system = Caller::system();
    let root = vfs.root();

    let bin = match setup.bin {
        Some(producer) => Node::generator("bin", shared(), producer),
        None => Node::directory("bin", shared()),
    };
    vfs.create(&root, "bin", bin, Some(shared()), &system).await?;

    let homes = Node::new(Kind::HomePointer, "home", shared(), Body::HomePointer);
    vfs.create(&root, "home", homes, Some(shared()), &system).await?;

    for (name, by) in [("get", Lookup::Id), ("find", Lookup::Name)] {
        let node = Node::generator(name, shared(), Arc::new(LookupProducer::new(by)));
        vfs.create(&root, name, node, Some(shared()), &system).await?;
    }

    let current = vfs
        .create(&root, "current", Node::directory("current", shared()), Some(shared()), &system)
        .await?;
    for role in ["user", "guild", "channel", "message"] {
        let node = Node::generator(role, shared(), Arc::new(CurrentProducer::new(role)));
        vfs.create(&current, role, node, Some(shared()), &system).await?;
    }

    let scripts = vfs
        .create(&root, "scripts", Node::directory("scripts", shared()), Some(shared()), &system)
        .await?;
    let count = setup.scripts.len();
    for (name, text) in setup.scripts {
        vfs.create(&scripts, &name, Node::file(&name, shared(), text), Some(shared()), &system)
            .await?;
    }
    info!(scripts = count, "mounted default tree");
    Ok(())
}

/// Load every regular file in `dir` as a script, sorted by name.
pub async fn read_scripts_dir(dir: &FsPath) -> ShellResult<Vec<(String, String)>> {
    let io = |e: std::io::Error| ShellError::internal(format!("{}: {e}", dir.display()));
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io)?;
    let mut scripts = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io)? {
        if !entry.file_type().await.map_err(io)?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let text = tokio::fs::read_to_string(entry.path()).await.map_err(io)?;
        scripts.push((name, text));
    }
    scripts.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(scripts)
}

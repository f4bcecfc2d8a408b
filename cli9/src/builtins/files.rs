use async_trait::async_trait;
use clap::{Arg, ArgAction, ArgMatches};
use cli9_core::{split_unescaped, Content, Node, Path, Resolve};
use cli9_sdk::{human_bytes, Data, Mode, ShellError, ShellResult, Value, ValueStream};

use super::{lines, quoted, text};
use crate::argparse::{flag, many, one, positional, required, switch};
use crate::context::Context;
use crate::registry::Command;

/// Column budget of the default `ls` layout.
const LS_WIDTH: usize = 60;

fn paths(id: &'static str) -> Arg {
    Arg::new(id).action(ArgAction::Append).num_args(0..)
}

const fn directory() -> Resolve {
    Resolve {
        create: false,
        directory: Some(true),
        last_name: false,
    }
}

const fn file() -> Resolve {
    Resolve {
        create: false,
        directory: Some(false),
        last_name: false,
    }
}

const fn parent() -> Resolve {
    Resolve {
        create: false,
        directory: None,
        last_name: true,
    }
}

/// The directory holding `path` and the name `path` ends in.
async fn split(ctx: &Context, path: &str) -> ShellResult<(Path, String)> {
    match ctx.resolve_with(path, &parent()).await? {
        (dir, Some(name)) => Ok((dir, name)),
        (dir, None) => Err(ShellError::file_exists(dir.to_string())),
    }
}

pub struct Cd;

#[async_trait]
impl Command for Cd {
    fn name(&self) -> &'static str {
        "cd"
    }

    fn description(&self) -> &'static str {
        "Change the working directory."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(positional("path").help("Directory to move to, home by default"))
            .arg(switch("verbose", 'v', "Print the new directory"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let target = one(args, "path").unwrap_or_else(|| "~".to_string());
        let (path, _) = ctx.resolve_with(&target, &directory()).await?;
        let shown = path.to_string();
        ctx.set_directory(path);
        if flag(args, "verbose") {
            Ok(text(shown))
        } else {
            Ok(ValueStream::new())
        }
    }
}

pub struct Pwd;

#[async_trait]
impl Command for Pwd {
    fn name(&self) -> &'static str {
        "pwd"
    }

    fn description(&self) -> &'static str {
        "Print the working directory."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser.arg(switch("short", 's', "Show the path relative to home"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let dir = ctx.directory();
        if flag(args, "short") {
            Ok(text(dir.short(ctx.scope().key().kind())))
        } else {
            Ok(text(dir.to_string()))
        }
    }
}

#[allow(clippy::struct_excessive_bools)]
struct Listing {
    all: bool,
    almost_all: bool,
    relative: bool,
    long: bool,
    literal: bool,
    every_line: bool,
}

impl Listing {
    fn from_args(args: &ArgMatches) -> Self {
        Self {
            all: flag(args, "all"),
            almost_all: flag(args, "almost-all"),
            relative: flag(args, "relative-path"),
            long: flag(args, "long"),
            literal: flag(args, "literal"),
            every_line: flag(args, "every-line"),
        }
    }

    const fn hidden(&self) -> bool {
        self.all || self.almost_all
    }

    fn columns(&self, names: &[String]) -> String {
        let shown: Vec<String> = names
            .iter()
            .map(|n| {
                if !self.literal && n.contains(' ') {
                    quoted(n)
                } else {
                    n.clone()
                }
            })
            .collect();
        let Some(widest) = shown.iter().map(|s| s.chars().count()).max() else {
            return String::new();
        };
        let per_line = (LS_WIDTH / (widest + 2)).max(1);
        shown
            .chunks(per_line)
            .map(|row| {
                row.iter()
                    .map(|s| format!("{s:<widest$}"))
                    .collect::<Vec<_>>()
                    .join("  ")
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn entry(ctx: &Context, path: &Path, name: &str) -> ShellResult<String> {
        let node = ctx.vfs().node(path).await?;
        let size = ctx.vfs().size(path, true, &ctx.caller).await?;
        let size = match size {
            Some(size) if node.kind.is_file() => human_bytes(size),
            Some(size) => size.to_string(),
            None => "-".to_string(),
        };
        Ok(format!(
            "{name}\n\tKind: {}\n\tOwnership: {}:{}\n\tPermissions: {}\n\tSize: {size}\n",
            node.kind.tag(),
            node.mode.owner,
            node.mode.group,
            node.mode
        ))
    }

    async fn long(&self, ctx: &Context, dir: &Path) -> ShellResult<String> {
        let mut entries = Vec::new();
        if self.all {
            entries.push(Self::entry(ctx, dir, ".").await?);
            entries.push(Self::entry(ctx, &dir.parent(), "..").await?);
        }
        for child in ctx.vfs().list(dir, &ctx.caller).await? {
            if !self.hidden() && child.name().starts_with('.') {
                continue;
            }
            entries.push(Self::entry(ctx, &child, child.name()).await?);
        }
        Ok(entries.join("\n"))
    }

    async fn render(&self, ctx: &Context, key: &str, dir: &Path) -> ShellResult<String> {
        if self.long {
            return self.long(ctx, dir).await;
        }
        let mut names = ctx.vfs().names(dir, &ctx.caller).await?;
        if self.all {
            names.splice(0..0, [".".to_string(), "..".to_string()]);
        } else if !self.almost_all {
            names.retain(|n| !n.starts_with('.'));
        }
        if self.relative {
            return Ok(names
                .iter()
                .filter(|n| *n != "." && *n != "..")
                .map(|n| format!("{key}/{n}"))
                .collect::<Vec<_>>()
                .join("\n"));
        }
        if self.every_line {
            return Ok(names.join("\n"));
        }
        Ok(self.columns(&names))
    }
}

pub struct Ls;

#[async_trait]
impl Command for Ls {
    fn name(&self) -> &'static str {
        "ls"
    }

    fn description(&self) -> &'static str {
        "List directory entries."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(paths("path"))
            .arg(switch("all", 'a', "Include entries starting with . and the implied . and ..").long("all"))
            .arg(switch("almost-all", 'A', "Include entries starting with .").long("almost-all"))
            .arg(switch("relative-path", 'R', "Prefix every entry with the listed path").long("relative-path"))
            .arg(switch("long", 'l', "Use the long listing format").long("long"))
            .arg(switch("literal", 'N', "Never quote names").long("literal"))
            .arg(switch("every-line", 'E', "One entry per line").long("every-line"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let listing = Listing::from_args(args);
        let mut targets = Vec::new();
        for key in many(args, "path") {
            let (dir, _) = ctx.resolve_with(&key, &directory()).await?;
            targets.push((key, dir));
        }
        if targets.is_empty() {
            targets.push((".".to_string(), ctx.directory()));
        }

        if let [(key, dir)] = targets.as_slice() {
            return Ok(text(listing.render(ctx, key, dir).await?));
        }
        let mut blocks = Vec::new();
        for (key, dir) in &targets {
            blocks.push(format!("{key}:\n{}", listing.render(ctx, key, dir).await?));
        }
        Ok(text(blocks.join("\n\n")))
    }
}

pub struct Cat;

#[async_trait]
impl Command for Cat {
    fn name(&self) -> &'static str {
        "cat"
    }

    fn description(&self) -> &'static str {
        "Print file contents, or the input."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(paths("path"))
            .arg(switch("list", 'L', "Return the contents as a list").long("list"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let mut contents = Vec::new();
        for key in many(args, "path") {
            let (path, _) = ctx.resolve_with(&key, &file()).await?;
            contents.push((key, ctx.vfs().read(&path, &ctx.caller).await?));
        }
        if contents.is_empty() {
            let input = stdin.map_or_else(Value::default, |s| Value::Str(s.text()));
            contents.push((".".to_string(), input));
        }

        if flag(args, "list") {
            return Ok(ValueStream::single(Value::List(
                contents.into_iter().map(|(_, v)| v).collect(),
            )));
        }
        if contents.len() == 1 {
            return Ok(contents.into_iter().map(|(_, v)| v).collect());
        }
        let joined = contents
            .iter()
            .map(|(key, value)| format!("{key}:\n{value}\n\n"))
            .collect::<String>();
        Ok(text(joined))
    }
}

pub struct Mkdir;

#[async_trait]
impl Command for Mkdir {
    fn name(&self) -> &'static str {
        "mkdir"
    }

    fn description(&self) -> &'static str {
        "Create directories."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(paths("path").required(true))
            .arg(switch("parents", 'p', "Create missing parents as needed").long("parents"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let parents = flag(args, "parents");
        let mut created = Vec::new();
        for route in many(args, "path") {
            let mut segments = split_unescaped(&route, '/');
            let mut dir = if segments.len() > 1 && segments[0].is_empty() {
                ctx.vfs().root()
            } else {
                ctx.directory()
            };
            segments.retain(|s| !s.is_empty() && s != ".");
            let last = segments.len().saturating_sub(1);
            for (index, segment) in segments.iter().enumerate() {
                let found = ctx
                    .vfs()
                    .resolve_with(segment, &dir, &directory(), &ctx.caller)
                    .await;
                dir = match found {
                    Ok((next, _)) => next,
                    Err(error) if error.is_not_found() && (parents || index == last) => {
                        let node = Node::directory(segment.as_str(), Mode::root());
                        let fresh = ctx.vfs().create(&dir, segment, node, None, &ctx.caller).await?;
                        created.push(fresh.to_string());
                        fresh
                    }
                    Err(error) => return Err(error),
                };
            }
        }
        Ok(lines(created))
    }
}

pub struct Touch;

#[async_trait]
impl Command for Touch {
    fn name(&self) -> &'static str {
        "touch"
    }

    fn description(&self) -> &'static str {
        "Create empty files that do not exist yet."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser.arg(paths("path").required(true))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        for path in many(args, "path") {
            let (dir, name) = split(ctx, &path).await?;
            match ctx.vfs().select(&dir, &name, &ctx.caller).await {
                Ok(_) => {}
                Err(error) if error.is_not_found() => {
                    let node = Node::file(name.as_str(), Mode::root(), "");
                    ctx.vfs().create(&dir, &name, node, None, &ctx.caller).await?;
                }
                Err(error) => return Err(error),
            }
        }
        Ok(ValueStream::new())
    }
}

pub struct Write;

#[async_trait]
impl Command for Write {
    fn name(&self) -> &'static str {
        "write"
    }

    fn description(&self) -> &'static str {
        "Write text or the input into a file, creating it when missing."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(positional("path").required(true))
            .arg(switch("append", 'a', "Append instead of replacing").long("append"))
            .arg(paths("text"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let path = required(args, self.name(), "path")?;
        let words = many(args, "text");
        let content = match stdin {
            Some(input) if words.is_empty() => match input.as_data() {
                Data::Text(text) => Content::Text(text),
                Data::Bytes(bytes) => Content::Bytes(bytes),
            },
            _ => Content::Text(words.join(" ")),
        };
        ctx.vfs()
            .write_path(&path, &ctx.directory(), content, !flag(args, "append"), &ctx.caller)
            .await?;
        Ok(ValueStream::new())
    }
}

pub struct Rm;

#[async_trait]
impl Command for Rm {
    fn name(&self) -> &'static str {
        "rm"
    }

    fn description(&self) -> &'static str {
        "Remove entries."
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(paths("path").required(true))
            .arg(switch("recursive", 'r', "Remove directories and their contents").long("recursive"))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let recursive = flag(args, "recursive");
        let mut removed = Vec::new();
        for path in many(args, "path") {
            let (dir, name) = split(ctx, &path).await?;
            removed.extend(ctx.vfs().remove(&dir, &name, recursive, &ctx.caller).await?);
        }
        Ok(lines(removed))
    }
}

fn parse_mode(command: &str, text: &str) -> ShellResult<u16> {
    let digits = text.strip_prefix("0o").unwrap_or(text);
    u16::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o777)
        .ok_or_else(|| ShellError::argparse(command, format!("invalid mode: '{text}'")))
}

pub struct Chmod;

#[async_trait]
impl Command for Chmod {
    fn name(&self) -> &'static str {
        "chmod"
    }

    fn description(&self) -> &'static str {
        "Change the mode of files."
    }

    fn usage(&self) -> Option<&'static str> {
        Some("chmod MODE PATH...")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(positional("mode").required(true).help("Octal mode, 0o000 to 0o777"))
            .arg(paths("path").required(true))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let mode = parse_mode(self.name(), &required(args, self.name(), "mode")?)?;
        let mut report = ValueStream::new();
        for route in many(args, "path") {
            let outcome = async {
                let path = ctx.resolve(&route).await?;
                ctx.vfs().chmod(&path, mode, &ctx.caller).await?;
                let node = ctx.vfs().node(&path).await?;
                Ok::<_, ShellError>(format!("Mode changed: {path} [{}]", node.mode))
            }
            .await;
            report.push(outcome.map_or_else(Value::Error, Value::Str));
        }
        Ok(report)
    }
}

/// Where `cp` and `mv` put things: an existing node, or a new name inside
/// an existing directory. Several sources need a directory, created when
/// missing.
async fn destination(ctx: &Context, dest: &str, several: bool) -> ShellResult<(Path, Option<String>)> {
    if several {
        let options = Resolve {
            create: true,
            directory: Some(true),
            last_name: false,
        };
        return ctx.resolve_with(dest, &options).await;
    }
    match ctx.resolve(dest).await {
        Ok(path) => Ok((path, None)),
        Err(error) if error.is_not_found() => {
            let (dir, name) = split(ctx, dest).await?;
            Ok((dir, Some(name)))
        }
        Err(error) => Err(error),
    }
}

fn transfer_args(parser: clap::Command) -> clap::Command {
    parser.arg(
        Arg::new("paths")
            .action(ArgAction::Append)
            .num_args(2..)
            .required(true)
            .value_name("SRC... DEST"),
    )
}

async fn transfer(ctx: &Context, args: &ArgMatches, moving: bool) -> ShellResult<ValueStream> {
    let mut paths = many(args, "paths");
    let Some(dest) = paths.pop() else {
        return Ok(ValueStream::new());
    };
    let (dest, name) = destination(ctx, &dest, paths.len() > 1).await?;
    let mut report = ValueStream::new();
    for source in &paths {
        let outcome = async {
            let source = ctx.resolve(source).await?;
            let done = if moving {
                ctx.vfs().rename(&source, &dest, name.as_deref(), &ctx.caller).await?
            } else {
                ctx.vfs().copy(&source, &dest, name.as_deref(), &ctx.caller).await?
            };
            Ok::<_, ShellError>(format!("{source} -> {done}"))
        }
        .await;
        report.push(outcome.map_or_else(Value::Error, Value::Str));
    }
    Ok(report)
}

pub struct Cp;

#[async_trait]
impl Command for Cp {
    fn name(&self) -> &'static str {
        "cp"
    }

    fn description(&self) -> &'static str {
        "Copy files and directories."
    }

    fn usage(&self) -> Option<&'static str> {
        Some("cp SRC... DEST")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        transfer_args(parser)
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        transfer(ctx, args, false).await
    }
}

pub struct Mv;

#[async_trait]
impl Command for Mv {
    fn name(&self) -> &'static str {
        "mv"
    }

    fn description(&self) -> &'static str {
        "Move or rename files and directories."
    }

    fn usage(&self) -> Option<&'static str> {
        Some("mv SRC... DEST")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        transfer_args(parser)
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        transfer(ctx, args, true).await
    }
}

pub struct Ln;

#[async_trait]
impl Command for Ln {
    fn name(&self) -> &'static str {
        "ln"
    }

    fn description(&self) -> &'static str {
        "Link a name to an existing node."
    }

    fn usage(&self) -> Option<&'static str> {
        Some("ln [-s] TARGET NAME")
    }

    fn arguments(&self, parser: clap::Command) -> clap::Command {
        parser
            .arg(switch("symbolic", 's', "Store the target as a path instead").long("symbolic"))
            .arg(positional("target").required(true))
            .arg(positional("name").required(true))
    }

    async fn run(
        &self,
        ctx: &mut Context,
        args: &ArgMatches,
        _stdin: Option<ValueStream>,
    ) -> ShellResult<ValueStream> {
        let target = required(args, self.name(), "target")?;
        let (dir, name) = split(ctx, &required(args, self.name(), "name")?).await?;
        let link = if flag(args, "symbolic") {
            ctx.vfs().symlink(&dir, &name, &target, &ctx.caller).await?
        } else {
            let source = ctx.resolve(&target).await?;
            ctx.vfs().hard_link(&source, &dir, &name, &ctx.caller).await?
        };
        Ok(text(link.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::tests::{context, run};

    async fn home() -> Context {
        let mut ctx = context().await;
        run(&mut ctx, "cd").await;
        ctx
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("chmod", "0o640").unwrap(), 0o640);
        assert_eq!(parse_mode("chmod", "755").unwrap(), 0o755);
        assert!(parse_mode("chmod", "9").is_err());
        assert!(parse_mode("chmod", "1777").is_err());
    }

    #[test]
    fn test_columns() {
        let listing = Listing {
            all: false,
            almost_all: false,
            relative: false,
            long: false,
            literal: false,
            every_line: false,
        };
        let names: Vec<String> = ["a", "bb", "c d"].iter().map(ToString::to_string).collect();
        assert_eq!(listing.columns(&names), "a      bb     'c d'");
        assert_eq!(listing.columns(&[]), "");
        let many: Vec<String> = (0..12).map(|i| format!("file{i:02}")).collect();
        assert_eq!(listing.columns(&many).lines().count(), 2);
    }

    #[tokio::test]
    async fn test_cd_and_pwd() {
        let mut ctx = home().await;
        assert_eq!(run(&mut ctx, "pwd").await.text(), "/home/user");
        assert_eq!(run(&mut ctx, "pwd -s").await.text(), "~");
        run(&mut ctx, "mkdir sub; write plain x").await;
        assert_eq!(run(&mut ctx, "cd -v sub").await.text(), "/home/user/sub");
        assert_eq!(run(&mut ctx, "pwd -s").await.text(), "~/sub");
        run(&mut ctx, "cd").await;
        let out = run(&mut ctx, "cd plain").await;
        assert!(matches!(out.errors().next(), Some(ShellError::NotADirectory(_))));
        assert_eq!(run(&mut ctx, "pwd").await.text(), "/home/user");
    }

    #[tokio::test]
    async fn test_mkdir_touch_ls() {
        let mut ctx = home().await;
        assert_eq!(run(&mut ctx, "mkdir -p a/b").await.text(), "/home/user/a\n/home/user/a/b");
        let out = run(&mut ctx, "mkdir x/y").await;
        assert!(out.errors().next().is_some_and(ShellError::is_not_found));
        run(&mut ctx, "touch a/.hidden 'a/two words'").await;

        assert_eq!(run(&mut ctx, "ls -E a").await.text().lines().count(), 2);
        assert_eq!(run(&mut ctx, "ls -A -E a").await.text().lines().count(), 3);
        let relative = run(&mut ctx, "ls -R a").await.text();
        assert!(relative.lines().all(|l| l.starts_with("a/")));
        assert!(run(&mut ctx, "ls a").await.text().contains("'two words'"));
        let long = run(&mut ctx, "ls -l a").await.text();
        assert!(long.contains("b\n\tKind: directory\n"));
        let both = run(&mut ctx, "ls a a/b").await.text();
        assert!(both.starts_with("a:\n") && both.contains("\n\na/b:\n"));
    }

    #[tokio::test]
    async fn test_write_cat_rm() {
        let mut ctx = home().await;
        run(&mut ctx, "write notes hello world").await;
        run(&mut ctx, "echo more | write -a notes").await;
        assert_eq!(run(&mut ctx, "cat notes").await.text(), "hello world\nmore");
        assert_eq!(run(&mut ctx, "echo piped | cat").await.text(), "piped");
        run(&mut ctx, "write other x").await;
        assert_eq!(run(&mut ctx, "cat notes other").await.text(), "notes:\nhello world\nmore\n\nother:\nx\n\n");
        let listed = run(&mut ctx, "cat -L notes other").await;
        assert!(matches!(listed.last(), Some(Value::List(items)) if items.len() == 2));

        assert_eq!(run(&mut ctx, "rm notes").await.text(), "/home/user/notes");
        assert!(run(&mut ctx, "cat notes").await.has_errors());
    }

    #[tokio::test]
    async fn test_cp_mv_ln_chmod() {
        let mut ctx = home().await;
        run(&mut ctx, "write src content").await;
        assert_eq!(
            run(&mut ctx, "cp src copy").await.text(),
            "/home/user/src -> /home/user/copy"
        );
        run(&mut ctx, "mkdir dir").await;
        assert_eq!(
            run(&mut ctx, "mv copy dir").await.text(),
            "/home/user/copy -> /home/user/dir/copy"
        );
        assert_eq!(run(&mut ctx, "cat dir/copy").await.text(), "content");

        assert_eq!(run(&mut ctx, "ln src hard").await.text(), "/home/user/hard");
        run(&mut ctx, "ln -s /home/user/src soft").await;
        assert_eq!(run(&mut ctx, "cat soft").await.text(), "content");

        let out = run(&mut ctx, "chmod 0o640 src nope").await;
        assert_eq!(out.items()[0], Value::str("Mode changed: /home/user/src [rw-r-----]"));
        assert!(out.items()[1].is_error());
    }
}

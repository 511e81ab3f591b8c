//! Path evaluation
//!
//! Walks a path one token at a time from the caller's current directory
//! (or the root for absolute paths). Symbolic links are spliced in by
//! pushing their target onto a stack of cursors; the outer path resumes
//! once the target is exhausted. A directory with a live mount is replaced
//! by the root of the mounted instance, and `..` at an instance root steps
//! back out through the mount point.
//!
//! Only one lock is held at a time: an instance lock while looking at its
//! nodes, or the mount table lock while crossing a mount.

use alloc::string::String;
use alloc::vec;

use crate::node::{NodeId, NodeKind};
use crate::path::{self, Token, Tokenizer};
use crate::permissions::{check_permission, AccessMode};
use crate::vfs::{Context, Location, Vfs};
use crate::{directory, ImfsError, ImfsResult, MountId, MAX_LINK_DEPTH};

/// How to evaluate a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    /// Dereference a link in the final component
    pub follow_final: bool,
    /// A missing final component is returned instead of failing
    pub create: bool,
    /// Access checked on the resolved node
    pub access: AccessMode,
}

impl EvalOptions {
    /// Follow every link, then check `access`
    pub const fn follow(access: AccessMode) -> Self {
        EvalOptions {
            follow_final: true,
            create: false,
            access,
        }
    }

    /// Leave a link in the final component alone (lstat, unlink, readlink)
    pub const fn no_follow() -> Self {
        EvalOptions {
            follow_final: false,
            create: false,
            access: AccessMode::Exists,
        }
    }

    /// Resolve the parent of a name about to be created
    pub const fn create() -> Self {
        EvalOptions {
            follow_final: false,
            create: true,
            access: AccessMode::Exists,
        }
    }
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self::follow(AccessMode::Exists)
    }
}

/// Outcome of an evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The path names an existing node
    Found(Location),
    /// Create mode only: the final component does not exist yet
    Missing { parent: Location, name: String },
}

impl Resolved {
    /// The existing node, or `NotFound`
    pub fn found(self) -> ImfsResult<Location> {
        match self {
            Resolved::Found(location) => Ok(location),
            Resolved::Missing { .. } => Err(ImfsError::NotFound),
        }
    }
}

/// A path being walked and how far it has got
struct Cursor {
    path: String,
    pos: usize,
}

/// Owned form of a path token
enum Walk {
    Name(String),
    UpDir,
    CurrentDir,
    End,
    Invalid,
}

impl Cursor {
    fn new(path: &str) -> Self {
        Cursor {
            path: String::from(path),
            pos: 0,
        }
    }

    fn next(&mut self) -> Walk {
        let mut tokenizer = Tokenizer::at(&self.path, self.pos);
        let walk = match tokenizer.next_token() {
            Token::Name(name) => Walk::Name(String::from(name)),
            Token::UpDir => Walk::UpDir,
            Token::CurrentDir => Walk::CurrentDir,
            Token::NoMorePath => Walk::End,
            Token::Invalid => Walk::Invalid,
        };
        let pos = tokenizer.position();
        self.pos = pos;
        walk
    }

    fn at_end(&self) -> bool {
        Tokenizer::at(&self.path, self.pos).at_end()
    }
}

/// Result of looking up one name inside the current directory
enum Step {
    /// Continue from this node
    Move(Location),
    /// Continue from the root of a mounted instance
    Mounted(MountId),
    /// Splice a symbolic link target in; relative targets start in `dir`
    Splice { target: String, dir: NodeId },
    /// Missing final component in create mode
    Missing,
}

/// Walk `path` to a node
pub fn evaluate(vfs: &Vfs, ctx: &Context, path: &str, options: EvalOptions) -> ImfsResult<Resolved> {
    if path.is_empty() {
        return Err(ImfsError::NotFound);
    }
    let mut current = if path::is_absolute(path) {
        vfs.root()?
    } else {
        ctx.cwd.clone()
    };
    let mut stack = vec![Cursor::new(path)];
    let mut links = 0usize;

    debug_imfs!("eval: '{}' (follow_final {}, create {})", path, options.follow_final, options.create);

    while let Some(cursor) = stack.last_mut() {
        match cursor.next() {
            Walk::End => {
                stack.pop();
            }
            Walk::Invalid => return Err(ImfsError::NameTooLong),
            Walk::CurrentDir => require_directory(&current)?,
            Walk::UpDir => current = up_dir(vfs, ctx, current)?,
            Walk::Name(name) => {
                let last = stack.iter().all(Cursor::at_end);
                match lookup_step(ctx, &current, &name, last, options, &mut links)? {
                    Step::Move(next) => current = next,
                    Step::Mounted(id) => current = vfs.mounts().root_of(id)?,
                    Step::Splice { target, dir } => {
                        current = if path::is_absolute(&target) {
                            vfs.root()?
                        } else {
                            Location::new(current.fs.clone(), dir)
                        };
                        stack.push(Cursor::new(&target));
                    }
                    Step::Missing => {
                        return Ok(Resolved::Missing {
                            parent: current,
                            name,
                        })
                    }
                }
            }
        }
    }

    let inner = current.fs.lock();
    check_permission(&ctx.creds, inner.node(current.node)?, options.access)?;
    drop(inner);
    Ok(Resolved::Found(current))
}

fn count_link(links: &mut usize) -> ImfsResult<()> {
    *links += 1;
    if *links > MAX_LINK_DEPTH {
        debug_imfs!("eval: link limit of {} exceeded", MAX_LINK_DEPTH);
        return Err(ImfsError::TooManyLinkLevels);
    }
    Ok(())
}

fn require_directory(location: &Location) -> ImfsResult<()> {
    let inner = location.fs.lock();
    if inner.node(location.node)?.is_directory() {
        Ok(())
    } else {
        Err(ImfsError::NotADirectory)
    }
}

/// Look `name` up in the directory at `current`
fn lookup_step(
    ctx: &Context,
    current: &Location,
    name: &str,
    last: bool,
    options: EvalOptions,
    links: &mut usize,
) -> ImfsResult<Step> {
    let inner = current.fs.lock();
    let dir = inner.node(current.node)?;
    if !dir.is_directory() {
        return Err(ImfsError::NotADirectory);
    }
    check_permission(&ctx.creds, dir, AccessMode::Execute)?;

    let Some(child) = directory::lookup(&inner.nodes, current.node, name)? else {
        if options.create && last {
            check_permission(&ctx.creds, dir, AccessMode::WriteExecute)?;
            return Ok(Step::Missing);
        }
        return Err(ImfsError::NotFound);
    };

    let node = inner.node(child)?;
    let follow = !last || options.follow_final;
    match &node.kind {
        NodeKind::HardLink(target) if follow => {
            count_link(links)?;
            Ok(Step::Move(Location::new(current.fs.clone(), *target)))
        }
        NodeKind::SymLink(target) if follow => {
            count_link(links)?;
            if target.is_empty() {
                return Err(ImfsError::NotFound);
            }
            Ok(Step::Splice {
                target: target.clone(),
                dir: current.node,
            })
        }
        _ => match node.mounted() {
            Some(id) => Ok(Step::Mounted(id)),
            None => Ok(Step::Move(Location::new(current.fs.clone(), child))),
        },
    }
}

/// Apply `..` to `current`
///
/// At an instance root the walk continues from the directory the instance
/// is mounted on; at the root instance's root `..` stays put.
fn up_dir(vfs: &Vfs, ctx: &Context, mut current: Location) -> ImfsResult<Location> {
    loop {
        let parent = {
            let inner = current.fs.lock();
            let node = inner.node(current.node)?;
            if !node.is_directory() {
                return Err(ImfsError::NotADirectory);
            }
            check_permission(&ctx.creds, node, AccessMode::Execute)?;
            node.parent
        };

        if let Some(parent) = parent {
            return Ok(Location::new(current.fs.clone(), parent));
        }
        if current.node != current.fs.root() {
            // Removed directory kept alive by an open handle
            return Err(ImfsError::NotFound);
        }
        match vfs.mounts().mount_point_of(current.fs.mount_id()) {
            Some(mount_point) => current = mount_point,
            None => return Ok(current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imfs::ImfsType;
    use crate::permissions::Credentials;

    fn setup() -> (Vfs, Context) {
        let vfs = Vfs::new();
        vfs.mount_root(&ImfsType::default(), "").unwrap();
        let ctx = vfs.context(Credentials::root()).unwrap();
        (vfs, ctx)
    }

    #[test]
    fn test_root_and_dots() {
        let (vfs, ctx) = setup();
        let root = vfs.root().unwrap();
        vfs.mkdir(&ctx, "/a", 0o755).unwrap();

        for path in ["/", "/.", "/..", "//", "/a/..", "\\a\\..\\.."] {
            let found = evaluate(&vfs, &ctx, path, EvalOptions::default()).unwrap();
            assert_eq!(found, Resolved::Found(root.clone()), "path {}", path);
        }
        assert_eq!(evaluate(&vfs, &ctx, "", EvalOptions::default()), Err(ImfsError::NotFound));
    }

    #[test]
    fn test_create_mode() {
        let (vfs, ctx) = setup();
        vfs.mkdir(&ctx, "/a", 0o755).unwrap();

        match evaluate(&vfs, &ctx, "/a/new", EvalOptions::create()).unwrap() {
            Resolved::Missing { parent, name } => {
                assert_eq!(name, "new");
                assert_eq!(parent, evaluate(&vfs, &ctx, "/a", EvalOptions::default()).unwrap().found().unwrap());
            }
            other => panic!("unexpected {:?}", other),
        }
        // Only the final component may be missing
        assert_eq!(
            evaluate(&vfs, &ctx, "/missing/new", EvalOptions::create()),
            Err(ImfsError::NotFound)
        );
    }

    #[test]
    fn test_non_directory_components() {
        let (vfs, ctx) = setup();
        vfs.create(&ctx, "/f", 0o644).unwrap();
        for path in ["/f/x", "/f/.", "/f/.."] {
            assert_eq!(
                evaluate(&vfs, &ctx, path, EvalOptions::default()),
                Err(ImfsError::NotADirectory),
                "path {}",
                path
            );
        }
    }

    #[test]
    fn test_name_too_long() {
        let (vfs, ctx) = setup();
        let long: String = core::iter::repeat('a').take(crate::NAME_MAX + 1).collect();
        let path = alloc::format!("/{}", long);
        assert_eq!(evaluate(&vfs, &ctx, &path, EvalOptions::default()), Err(ImfsError::NameTooLong));
    }

    #[test]
    fn test_relative_symlink_resumes_outer_path() {
        let (vfs, ctx) = setup();
        vfs.mkdir(&ctx, "/a", 0o755).unwrap();
        vfs.mkdir(&ctx, "/a/b", 0o755).unwrap();
        vfs.create(&ctx, "/a/b/f", 0o644).unwrap();
        vfs.symlink(&ctx, "b", "/a/link").unwrap();

        let direct = evaluate(&vfs, &ctx, "/a/b/f", EvalOptions::default()).unwrap();
        let via_link = evaluate(&vfs, &ctx, "/a/link/f", EvalOptions::default()).unwrap();
        assert_eq!(direct, via_link);

        // Not following the final link stops at the link itself
        let link = evaluate(&vfs, &ctx, "/a/link", EvalOptions::no_follow()).unwrap().found().unwrap();
        assert_eq!(link.fs.lock().node(link.node).unwrap().name, "link");
    }

    #[test]
    fn test_search_permission_required() {
        let (vfs, ctx) = setup();
        vfs.mkdir(&ctx, "/locked", 0o700).unwrap();
        vfs.create(&ctx, "/locked/f", 0o644).unwrap();

        let user = Context {
            creds: Credentials::new(1000, 1000),
            cwd: ctx.cwd.clone(),
        };
        assert_eq!(
            evaluate(&vfs, &user, "/locked/f", EvalOptions::default()),
            Err(ImfsError::PermissionDenied)
        );
        assert_eq!(
            evaluate(&vfs, &user, "/locked/..", EvalOptions::default()),
            Err(ImfsError::PermissionDenied)
        );
    }
}

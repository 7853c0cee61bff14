//! Path resolution: walking a [`Path`] element by element through the
//! dentry cache and directory scans down to a resolved [`Inode`].

use std::sync::Arc;

use crate::dentry::DentryCache;
use crate::error::{VfsError, VfsResult};
use crate::inode::{Inode, InodeType, Itable};
use crate::path::{FileName, Path};

/// Resolves `path`, optionally stopping one element short of the final
/// component, the way xv6 parameterizes `nameiparent` vs. `namei` from a
/// single shared walk.
///
/// Returns the resolved inode, unlocked. When `stop_before_last` is set,
/// also returns the final path element's name so the caller (typically
/// `create`/`unlink`) can look it up or link it itself while holding the
/// parent locked.
pub fn namex<'p>(
    itable: &Itable,
    dentries: &DentryCache,
    cwd: Arc<Inode>,
    path: &'p Path,
    stop_before_last: bool,
) -> VfsResult<(Arc<Inode>, Option<&'p FileName>)> {
    let mut ip = if path.is_absolute() {
        itable.root()?
    } else {
        cwd
    };

    let mut rest = path;
    loop {
        let Some((name, next)) = rest.skipelem() else {
            return Ok((ip, None));
        };

        if stop_before_last && next.is_empty() {
            return Ok((ip, Some(name)));
        }

        let lock_target = ip.clone();
        let lock_result = lock_target.lock();
        let guard = match lock_result {
            Ok(g) => g,
            Err(e) => {
                itable.put(ip)?;
                return Err(e);
            }
        };
        if guard.inner().typ != InodeType::Dir {
            drop(guard);
            itable.put(ip)?;
            return Err(VfsError::NotADirectory);
        }

        let cached = dentries.lookup(itable, ip.dev, ip.inum, name.as_bytes());
        let next_ip = match cached {
            Some(cached_ip) => {
                drop(guard);
                cached_ip
            }
            None => {
                let lookup_result = ip.sb.ops.dirlookup(ip.dev, guard.inner(), name);
                drop(guard);
                let inum = match lookup_result {
                    Ok((inum, _off)) => inum,
                    Err(e) => {
                        itable.put(ip)?;
                        return Err(e);
                    }
                };
                let resolved = match itable.get(ip.dev, inum) {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        itable.put(ip)?;
                        return Err(e);
                    }
                };
                dentries.insert(itable, ip.dev, ip.inum, name.as_bytes(), &resolved);
                resolved
            }
        };
        itable.put(ip)?;
        ip = next_ip;
        rest = next;
    }
}

/// Resolves an absolute or `cwd`-relative path to its inode.
pub fn namei(itable: &Itable, dentries: &DentryCache, cwd: Arc<Inode>, path: &Path) -> VfsResult<Arc<Inode>> {
    let (ip, _) = namex(itable, dentries, cwd, path, false)?;
    Ok(ip)
}

/// Resolves every element but the last, returning the parent directory
/// and the final element's name.
pub fn nameiparent<'p>(
    itable: &Itable,
    dentries: &DentryCache,
    cwd: Arc<Inode>,
    path: &'p Path,
) -> VfsResult<(Arc<Inode>, &'p FileName)> {
    let (ip, name) = namex(itable, dentries, cwd, path, true)?;
    match name {
        Some(n) => Ok((ip.clone(), n)),
        None => {
            itable.put(ip)?;
            Err(VfsError::InvalidArgument)
        }
    }
}

//! 对 `qmri-berry::dataset` 的更一层封装. 提供根目录回退和会话发现.

use std::env;
use std::fs;
use std::io;
use std::iter;
use std::path::{Path, PathBuf};

use either::Either;
use log::debug;
use qmri_berry::dataset::home_dataset_dir_with;
use qmri_berry::session::SessionId;

/// 定量图数据集根目录的环境变量.
pub const QMRI_DIR_VAR: &str = "QMRI_DERIV_DIR";

/// 分割数据集根目录的环境变量.
pub const SEGMENTATION_DIR_VAR: &str = "QMRI_BIBSNET_DIR";

/// 若环境变量 `var` 非空则返回其值, 否则返回 `$HOME/dataset/{fallback}`.
pub fn dir_from_env_or_home(var: &str, fallback: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with([fallback]),
    }
}

/// 获取定量图数据集根目录.
///
/// 1. 若环境变量 `$QMRI_DERIV_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/qmri`.
#[inline]
pub fn qmri_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home(QMRI_DIR_VAR, "qmri")
}

/// 获取分割数据集根目录.
///
/// 1. 若环境变量 `$QMRI_BIBSNET_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/bibsnet`.
#[inline]
pub fn segmentation_dir_from_env_or_home() -> Option<PathBuf> {
    dir_from_env_or_home(SEGMENTATION_DIR_VAR, "bibsnet")
}

/// 把相对路径解释为相对于 `cwd` 的路径. 绝对路径原样返回.
pub fn absolute<P: AsRef<Path>>(path: P, cwd: &Path) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_owned()
    } else {
        cwd.join(path)
    }
}

/// `dir` 下以 `prefix` 开头的子目录名, 按名称排序.
fn subdirs_with_prefix(dir: &Path, prefix: &str) -> io::Result<Vec<String>> {
    let mut ans = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) && entry.path().is_dir() {
            ans.push(name);
        }
    }
    ans.sort();
    Ok(ans)
}

/// 补全 `sub-` 前缀.
fn participant_dir(label: &str) -> String {
    if label.starts_with("sub-") {
        label.to_string()
    } else {
        format!("sub-{label}")
    }
}

/// 在 BIDS 根目录下发现待处理的会话.
///
/// `participants` 为空时处理全部 `sub-*` 目录; 否则每个标签都必须存在.
/// 未指定 `session` 时处理受试者目录下全部 `ses*` 目录, 没有会话层级时为单个空会话;
/// 指定了 `session` 时它必须存在于每个受试者目录下.
pub fn discover_sessions(
    bids_root: &Path,
    participants: &[String],
    session: Option<&str>,
) -> io::Result<Vec<SessionId>> {
    let subjects = if participants.is_empty() {
        subdirs_with_prefix(bids_root, "sub-")?
    } else {
        participants.iter().map(|p| participant_dir(p)).collect()
    };

    let mut ans = Vec::new();
    for subject in subjects {
        let subject_path = bids_root.join(&subject);
        if !subject_path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no directory found at `{}`", subject_path.display()),
            ));
        }
        let sessions = match session {
            Some(s) => {
                let id = SessionId::new(&subject, s);
                let ses = id.session().unwrap_or_default().to_string();
                if !subject_path.join(&ses).is_dir() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("session `{ses}` does not exist at `{}`", subject_path.display()),
                    ));
                }
                Either::Left(iter::once(ses))
            }
            None => {
                let found = subdirs_with_prefix(&subject_path, "ses")?;
                if found.is_empty() {
                    Either::Right(Either::Left(iter::once(String::new())))
                } else {
                    Either::Right(Either::Right(found.into_iter()))
                }
            }
        };
        for ses in sessions {
            let id = SessionId::new(&subject, &ses);
            debug!("discovered {id}");
            ans.push(id);
        }
    }
    Ok(ans)
}

/// 会话在 `root` 下的目录 (`sub-*/ses-*`, 或无会话层级时的 `sub-*`).
pub fn session_dir(root: &Path, session: &SessionId) -> PathBuf {
    let mut ans = root.join(session.subject());
    if let Some(ses) = session.session() {
        ans.push(ses);
    }
    ans
}

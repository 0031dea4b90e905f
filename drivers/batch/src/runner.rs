//! 程序运行函数.

use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use log::{error, info, warn};
use qmri_berry::dataset::StudyLayout;
use qmri_berry::engine::NativeEngine;
use qmri_berry::pipeline::{process_session, SessionContext};
use qmri_berry::session::SessionId;
use threadpool::ThreadPool;
use utils::loader;

use crate::result::{BatchReport, Outcome};

/// 输出目录已存在时的处理策略.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExistingPolicy {
    /// 给出提示并跳过.
    Refuse,
    /// 静默跳过.
    Skip,
    /// 删除后重新处理.
    Overwrite,
}

/// 一次批处理.
pub struct Plan {
    /// 数据集根目录.
    pub layout: StudyLayout,
    /// 待处理会话.
    pub sessions: Vec<SessionId>,
    /// 会话共享上下文.
    pub ctx: SessionContext,
    /// 配准引擎.
    pub engine: NativeEngine,
    /// 已有输出的处理策略.
    pub policy: ExistingPolicy,
    /// 并行会话数.
    pub jobs: usize,
}

/// 处理前检查: 已有输出, 缺失的输入目录.
fn prepare(
    layout: &StudyLayout,
    session: &SessionId,
    policy: ExistingPolicy,
) -> Result<(), Outcome> {
    let out = loader::session_dir(&layout.output_root, session);
    if out.exists() {
        match policy {
            ExistingPolicy::Skip => {
                info!("{session}: `{}` already exists, skipped", out.display());
                return Err(Outcome::Skipped("output exists".to_string()));
            }
            ExistingPolicy::Refuse => {
                warn!(
                    "{session}: `{}` already exists. Delete it, or run with \
                     --overwrite-existing to reprocess, or --skip-existing to ignore it",
                    out.display()
                );
                return Err(Outcome::Skipped("output exists".to_string()));
            }
            ExistingPolicy::Overwrite => {
                info!("{session}: removing existing `{}`", out.display());
                fs::remove_dir_all(&out).map_err(|e| {
                    Outcome::Failed(format!("cannot remove `{}`: {e}", out.display()))
                })?;
            }
        }
    }
    for (what, root) in [
        ("qMRI maps", &layout.qmri_root),
        ("segmentation", &layout.segmentation_root),
    ] {
        let dir: PathBuf = loader::session_dir(root, session);
        if !dir.is_dir() {
            warn!("{session}: no {what} directory at `{}`, skipped", dir.display());
            return Err(Outcome::Skipped(format!("no {what} directory")));
        }
    }
    Ok(())
}

/// 处理单个会话. 错误只影响该会话.
fn run_one(
    layout: &StudyLayout,
    session: &SessionId,
    ctx: &SessionContext,
    engine: &NativeEngine,
    policy: ExistingPolicy,
) -> Outcome {
    if let Err(outcome) = prepare(layout, session, policy) {
        return outcome;
    }
    info!("{session}: processing started");
    match process_session(layout, session, engine, ctx) {
        Ok(out) => {
            info!("{session}: finished");
            Outcome::Done(out)
        }
        Err(e) => {
            error!("{e}");
            Outcome::Failed(e.source.to_string())
        }
    }
}

/// 实际运行. 每个会话占用线程池中的一个线程.
pub fn run(plan: Plan) -> BatchReport {
    let Plan {
        layout,
        sessions,
        ctx,
        engine,
        policy,
        jobs,
    } = plan;
    let n = sessions.len();
    let shared = Arc::new((layout, ctx, engine));
    let pool = ThreadPool::new(jobs.clamp(1, n.max(1)));
    let (tx, rx) = mpsc::channel();

    for session in sessions {
        let shared = Arc::clone(&shared);
        let tx = tx.clone();
        pool.execute(move || {
            let (layout, ctx, engine) = shared.as_ref();
            let outcome = run_one(layout, &session, ctx, engine, policy);
            // 接收端在全部结果返回前不会被丢弃.
            let _ = tx.send((session, outcome));
        });
    }
    drop(tx);

    let mut report = BatchReport::from_iter(rx.iter().take(n));
    if report.len() < n {
        error!("{} session worker(s) panicked", n - report.len());
    }
    report.sort();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(root: &std::path::Path) -> StudyLayout {
        StudyLayout::new(
            root.join("bids"),
            root.join("bibsnet"),
            root.join("qmri"),
            root.join("out"),
        )
    }

    #[test]
    fn test_prepare_policies() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let session = SessionId::new("01", "A");

        // 缺少输入目录.
        assert!(matches!(
            prepare(&layout, &session, ExistingPolicy::Refuse),
            Err(Outcome::Skipped(_))
        ));

        fs::create_dir_all(loader::session_dir(&layout.qmri_root, &session)).unwrap();
        fs::create_dir_all(loader::session_dir(&layout.segmentation_root, &session)).unwrap();
        assert!(prepare(&layout, &session, ExistingPolicy::Refuse).is_ok());

        let out = loader::session_dir(&layout.output_root, &session);
        fs::create_dir_all(&out).unwrap();
        assert!(matches!(
            prepare(&layout, &session, ExistingPolicy::Skip),
            Err(Outcome::Skipped(_))
        ));
        assert!(matches!(
            prepare(&layout, &session, ExistingPolicy::Refuse),
            Err(Outcome::Skipped(_))
        ));
        assert!(prepare(&layout, &session, ExistingPolicy::Overwrite).is_ok());
        assert!(!out.exists());
    }

    #[test]
    fn test_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let sessions = vec![SessionId::new("01", ""), SessionId::new("02", "")];
        for s in sessions.iter() {
            fs::create_dir_all(loader::session_dir(&layout.qmri_root, s)).unwrap();
            fs::create_dir_all(loader::session_dir(&layout.segmentation_root, s)).unwrap();
        }
        let ctx = SessionContext::from_config(Default::default(), Vec::new()).unwrap();
        let report = run(Plan {
            layout,
            sessions,
            ctx,
            engine: NativeEngine::default(),
            policy: ExistingPolicy::Refuse,
            jobs: 2,
        });
        assert_eq!(report.len(), 2);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.entries()[0].0, SessionId::new("01", ""));
    }
}

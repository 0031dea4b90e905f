//! 批处理结果.

use std::io::{self, Write};

use qmri_berry::pipeline::SessionOutputs;
use qmri_berry::session::SessionId;

/// 单个会话的结果.
#[derive(Debug)]
pub enum Outcome {
    /// 处理完成.
    Done(SessionOutputs),
    /// 未处理, 附原因.
    Skipped(String),
    /// 处理失败, 附错误信息.
    Failed(String),
}

/// 将 `outcome` 的结果写进 `w` 中.
fn describe_into<W: Write>(session: &SessionId, outcome: &Outcome, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.6}"),
            None => "/".to_string(),
        }
    }

    match outcome {
        Outcome::Done(out) => {
            writeln!(w, "Session `{session}`: done")?;
            writeln!(w, "{S4}Output directory: {}", out.anat_dir.display())?;
            writeln!(w, "{S4}Resampled maps: {}", out.resampled_maps.len())?;
            writeln!(w, "{S4}Custom tables: {}", out.custom_tables.len())?;
            writeln!(w, "{S4}Final cost: {:.6}", out.final_cost)?;
            write!(
                w,
                "{S4}Voxel correlation within mask: {}",
                f64_to_display(out.correlation)
            )
        }
        Outcome::Skipped(why) => write!(w, "Session `{session}`: skipped ({why})"),
        Outcome::Failed(why) => write!(w, "Session `{session}`: FAILED\n{S4}{why}"),
    }
}

/// 批处理最终结果.
#[derive(Debug, Default)]
pub struct BatchReport {
    data: Vec<(SessionId, Outcome)>,
}

impl BatchReport {
    pub fn from_iter<I: IntoIterator<Item = (SessionId, Outcome)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 按会话排序.
    pub fn sort(&mut self) {
        self.data.sort_by(|a, b| a.0.cmp(&b.0));
    }

    /// 会话数.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 全部结果.
    #[inline]
    pub fn entries(&self) -> &[(SessionId, Outcome)] {
        &self.data
    }

    /// 失败会话数.
    pub fn failed(&self) -> usize {
        self.data
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Failed(_)))
            .count()
    }

    /// 完成会话数.
    pub fn done(&self) -> usize {
        self.data
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Done(_)))
            .count()
    }

    /// 写出运行结果.
    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        utils::sep_to(&mut w)?;
        for (session, outcome) in self.data.iter() {
            describe_into(session, outcome, &mut w)?;
            writeln!(w)?;
            utils::sep_to(&mut w)?;
        }
        writeln!(
            w,
            "{} done, {} skipped, {} failed",
            self.done(),
            self.len() - self.done() - self.failed(),
            self.failed()
        )
    }
}

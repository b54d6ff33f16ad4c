//! The workspace-staging collaborator.
//!
//! Populate asks a [`Stager`] to materialize each case's `copy`/`link`
//! requests into its working directory, with `when` guards evaluated
//! against the case's parameters. A staging failure (missing source,
//! permission problem) marks the owning case `Fail` and leaves the rest
//! of the session untouched.

use std::path::Path;

use canary_core::{EvalContext, Status};

use crate::case::Case;
use crate::generator::StagingKind;

/// Materializes a case's staged inputs.
pub trait Stager: Send + Sync {
    /// Stage every applicable request into `workdir`. Sources are
    /// resolved relative to the test file's directory.
    fn stage(&self, case: &Case, workdir: &Path, ctx: &EvalContext<'_>) -> anyhow::Result<()>;
}

/// Default copy/link stager.
#[derive(Debug, Default)]
pub struct FsStager;

impl Stager for FsStager {
    fn stage(&self, case: &Case, workdir: &Path, ctx: &EvalContext<'_>) -> anyhow::Result<()> {
        let source_dir = case.source.parent().unwrap_or(Path::new("."));
        for decl in &case.staging {
            if !decl.when.eval(ctx) {
                continue;
            }
            let src = source_dir.join(&decl.src);
            let file_name = decl
                .dst
                .clone()
                .or_else(|| {
                    src.file_name().map(|n| n.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| decl.src.clone());
            let dst = workdir.join(file_name);
            match decl.kind {
                StagingKind::Copy => {
                    std::fs::copy(&src, &dst).map_err(|e| {
                        anyhow::anyhow!(
                            "cannot copy '{}' to '{}': {e}",
                            src.display(),
                            dst.display()
                        )
                    })?;
                }
                StagingKind::Link => {
                    if dst.symlink_metadata().is_ok() {
                        std::fs::remove_file(&dst)?;
                    }
                    symlink(&src, &dst).map_err(|e| {
                        anyhow::anyhow!(
                            "cannot link '{}' to '{}': {e}",
                            src.display(),
                            dst.display()
                        )
                    })?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(not(unix))]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::hard_link(src, dst)
}

/// Stage one case, mapping failure to its terminal status. Returns
/// whether staging succeeded.
pub fn stage_case(
    stager: &dyn Stager,
    case: &mut Case,
    workdir: &Path,
    platforms: &[String],
    options: &[String],
) -> bool {
    let ctx = EvalContext {
        params: &case.params,
        platforms,
        options,
    };
    match stager.stage(case, workdir, &ctx) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(case = %case.name, error = %e, "staging failed");
            case.state.status = Some(Status::Fail);
            case.state.reason = Some(format!("staging failed: {e:#}"));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{Generator, StagingDecl};
    use crate::graph::{freeze, FreezeOptions};
    use canary_core::WhenExpr;
    use std::fs;

    #[test]
    fn copies_and_links_with_rename() {
        let src_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        fs::write(src_dir.path().join("input.yaml"), "data").unwrap();
        fs::write(src_dir.path().join("mesh.exo"), "mesh").unwrap();

        let mut g = Generator::new("t", vec!["./run".into()]);
        g.source = src_dir.path().join("t.canary");
        g.staging = vec![
            StagingDecl {
                kind: StagingKind::Copy,
                src: "input.yaml".into(),
                dst: Some("in.yaml".into()),
                when: WhenExpr::True,
            },
            StagingDecl {
                kind: StagingKind::Link,
                src: "mesh.exo".into(),
                dst: None,
                when: WhenExpr::True,
            },
        ];
        let mut graph = freeze(&[g], &FreezeOptions::default()).unwrap();
        let case = &mut graph.cases[0];

        assert!(stage_case(&FsStager, case, work_dir.path(), &[], &[]));
        assert_eq!(
            fs::read_to_string(work_dir.path().join("in.yaml")).unwrap(),
            "data"
        );
        let mesh = work_dir.path().join("mesh.exo");
        assert!(mesh.symlink_metadata().unwrap().file_type().is_symlink());
    }

    #[test]
    fn guarded_requests_are_skipped() {
        let src_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();

        let mut g = Generator::new("t", vec!["./run".into()]);
        g.source = src_dir.path().join("t.canary");
        g.staging = vec![StagingDecl {
            kind: StagingKind::Copy,
            // The source does not exist, but the guard is false.
            src: "gpu-input.yaml".into(),
            dst: None,
            when: WhenExpr::parse("option=gpu").unwrap(),
        }];
        let mut graph = freeze(&[g], &FreezeOptions::default()).unwrap();
        let case = &mut graph.cases[0];
        assert!(stage_case(&FsStager, case, work_dir.path(), &[], &[]));
    }

    #[test]
    fn missing_source_fails_the_case_only() {
        let src_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();

        let mut g = Generator::new("t", vec!["./run".into()]);
        g.source = src_dir.path().join("t.canary");
        g.staging = vec![StagingDecl {
            kind: StagingKind::Copy,
            src: "missing.yaml".into(),
            dst: None,
            when: WhenExpr::True,
        }];
        let mut graph = freeze(&[g], &FreezeOptions::default()).unwrap();
        let case = &mut graph.cases[0];
        assert!(!stage_case(&FsStager, case, work_dir.path(), &[], &[]));
        assert_eq!(case.state.status, Some(Status::Fail));
        assert!(case
            .state
            .reason
            .as_deref()
            .unwrap()
            .starts_with("staging failed"));
    }
}

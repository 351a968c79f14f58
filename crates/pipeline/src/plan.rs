use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::config::{OutputLayout, PipelineConfig};
use crate::job::TranscodeJob;
use crate::media::MediaPath;
use log::{debug, info};

/// Fatal: raised before any transcoding starts
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("{} and {} both map to output {}", first.display(), second.display(), output.display())]
    Collision {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },
    #[error("output {} would overwrite an input file", .0.display())]
    OverwritesInput(PathBuf),
}

/// Maps inputs onto a mirrored output tree
#[derive(Debug, Clone)]
pub struct JobPlanner {
    output_root: PathBuf,
    layout: OutputLayout,
    case_insensitive: bool,
}

impl JobPlanner {
    pub fn new(output_root: impl Into<PathBuf>, layout: OutputLayout, case_insensitive: bool) -> Self {
        Self {
            output_root: output_root.into(),
            layout,
            case_insensitive,
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(&cfg.output_root, cfg.output_layout, cfg.case_insensitive_collisions)
    }

    /// Where `input` lands. File name and extension are kept as-is.
    pub fn output_path(&self, input: &MediaPath) -> PathBuf {
        match self.layout {
            OutputLayout::Relative => self.output_root.join(input.relative()),
            OutputLayout::RootPrefixed => {
                let root_name = input
                    .root()
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| "root".into());
                self.output_root.join(root_name).join(input.relative())
            }
        }
    }

    /// One pending job per distinct input.
    ///
    /// Every output path is checked up front: two inputs mapping to the same
    /// output (optionally ignoring case) or an output landing on an input
    /// fails the whole plan.
    pub fn plan<'a, I>(&self, inputs: I) -> Result<Vec<TranscodeJob>, PlanningError>
    where
        I: IntoIterator<Item = &'a MediaPath>,
    {
        self.plan_guarded(inputs, &HashSet::new())
    }

    /// Like [`JobPlanner::plan`], but no output may land on any of
    /// `originals` either: every file found on disk, planned or not.
    pub fn plan_guarded<'a, I>(&self, inputs: I, originals: &HashSet<PathBuf>) -> Result<Vec<TranscodeJob>, PlanningError>
    where
        I: IntoIterator<Item = &'a MediaPath>,
    {
        let inputs: Vec<&MediaPath> = inputs.into_iter().collect();
        let input_files: HashSet<PathBuf> = inputs.iter().map(|p| p.full_path()).collect();

        let mut claimed: HashMap<String, PathBuf> = HashMap::new();
        let mut jobs = Vec::with_capacity(inputs.len());

        for input in inputs {
            let source = input.full_path();
            let output = self.output_path(input);

            if input_files.contains(&output) || originals.contains(&output) {
                return Err(PlanningError::OverwritesInput(output));
            }

            match claimed.get(&self.collision_key(&output)) {
                Some(first) if *first == source => {
                    debug!("Input listed twice, planning once: {}", source.display());
                    continue;
                }
                Some(first) => {
                    return Err(PlanningError::Collision {
                        first: first.clone(),
                        second: source,
                        output,
                    });
                }
                None => {}
            }

            claimed.insert(self.collision_key(&output), source);
            jobs.push(TranscodeJob::new(input.clone(), output));
        }

        info!("Planned {} job(s) under {}", jobs.len(), self.output_root.display());
        Ok(jobs)
    }

    fn collision_key(&self, output: &Path) -> String {
        let key = output.to_string_lossy();
        if self.case_insensitive {
            key.to_lowercase()
        } else {
            key.into_owned()
        }
    }
}

//! Render-job bookkeeping: at most one job per project.

use std::collections::HashMap;
use std::path::PathBuf;

use tilecast_common::error::{TilecastError, TilecastResult};
use tilecast_project_model::export::{
    download_label, ExecutionTarget, ExportPreset, RenderJob, RenderJobStatus,
};
use tilecast_project_model::project::Project;

/// Tracks the current render job of each project.
#[derive(Debug, Default)]
pub struct RenderJobManager {
    jobs: HashMap<String, RenderJob>,
}

impl RenderJobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a new job, superseding the project's previous one and removing
    /// its output file.
    pub fn queue(
        &mut self,
        project: &Project,
        preset: ExportPreset,
        target: ExecutionTarget,
    ) -> &RenderJob {
        if let Some(previous) = self.jobs.remove(&project.id) {
            release_output(&previous);
            tracing::debug!(job = %previous.id, project = %project.id, "Superseded render job");
        }
        let job = RenderJob::new(project.id.clone(), preset, target);
        tracing::info!(job = %job.id, preset = preset.id(), "Render job queued");
        self.jobs.entry(project.id.clone()).or_insert(job)
    }

    pub fn get(&self, project_id: &str) -> Option<&RenderJob> {
        self.jobs.get(project_id)
    }

    pub fn mark_processing(&mut self, job_id: &str) -> TilecastResult<()> {
        let job = self.active_mut(job_id)?;
        job.status = RenderJobStatus::Processing;
        Ok(())
    }

    /// Record progress as a percentage, clamped to `[0, 100]`.
    pub fn report_progress(&mut self, job_id: &str, percent: f64) -> TilecastResult<()> {
        let job = self.active_mut(job_id)?;
        job.progress = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Ok(())
    }

    pub fn succeed(
        &mut self,
        job_id: &str,
        title: &str,
        output: PathBuf,
        mime_type: &str,
        extension: &str,
    ) -> TilecastResult<()> {
        let job = self.active_mut(job_id)?;
        job.status = RenderJobStatus::Succeeded;
        job.progress = 100.0;
        job.mime_type = Some(mime_type.to_string());
        job.extension = Some(extension.to_string());
        job.download_label = Some(download_label(title, extension));
        job.output = Some(output);
        tracing::info!(job = %job_id, mime = mime_type, "Render job succeeded");
        Ok(())
    }

    pub fn fail(&mut self, job_id: &str, message: impl Into<String>) -> TilecastResult<()> {
        let job = self.active_mut(job_id)?;
        let message = message.into();
        tracing::warn!(job = %job_id, error = %message, "Render job failed");
        job.status = RenderJobStatus::Failed;
        job.error = Some(message);
        Ok(())
    }

    fn active_mut(&mut self, job_id: &str) -> TilecastResult<&mut RenderJob> {
        let job = self
            .jobs
            .values_mut()
            .find(|job| job.id == job_id)
            .ok_or_else(|| TilecastError::project(format!("Unknown render job: {job_id}")))?;
        if job.status.is_terminal() {
            return Err(TilecastError::project(format!(
                "Render job {job_id} already finished"
            )));
        }
        Ok(job)
    }
}

fn release_output(job: &RenderJob) {
    if let Some(output) = &job.output {
        if let Err(e) = std::fs::remove_file(output) {
            tracing::debug!(path = %output.display(), error = %e, "Output already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(manager: &mut RenderJobManager, project: &Project) -> String {
        manager
            .queue(project, ExportPreset::VideoMp4, ExecutionTarget::Server)
            .id
            .clone()
    }

    #[test]
    fn test_lifecycle() {
        let project = Project::new("Summer Reel");
        let mut manager = RenderJobManager::new();
        let id = queued(&mut manager, &project);
        assert_eq!(manager.get(&project.id).unwrap().status, RenderJobStatus::Queued);

        manager.mark_processing(&id).unwrap();
        manager.report_progress(&id, 140.0).unwrap();
        assert_eq!(manager.get(&project.id).unwrap().progress, 100.0);
        manager.report_progress(&id, -3.0).unwrap();
        assert_eq!(manager.get(&project.id).unwrap().progress, 0.0);

        manager
            .succeed(&id, &project.title, PathBuf::from("/tmp/x.mp4"), "video/mp4", "mp4")
            .unwrap();
        let job = manager.get(&project.id).unwrap();
        assert_eq!(job.status, RenderJobStatus::Succeeded);
        assert_eq!(job.download_label.as_deref(), Some("Summer-Reel.mp4"));
    }

    #[test]
    fn test_terminal_jobs_are_immutable() {
        let project = Project::new("p");
        let mut manager = RenderJobManager::new();
        let id = queued(&mut manager, &project);
        manager.fail(&id, "encoder crashed").unwrap();
        assert!(manager.report_progress(&id, 50.0).is_err());
        assert!(manager.mark_processing(&id).is_err());
        let job = manager.get(&project.id).unwrap();
        assert_eq!(job.status, RenderJobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("encoder crashed"));
    }

    #[test]
    fn test_queue_supersedes_and_releases_output() {
        let project = Project::new("p");
        let output = std::env::temp_dir().join("tilecast_job_release.png");
        std::fs::write(&output, b"png").unwrap();

        let mut manager = RenderJobManager::new();
        let first = queued(&mut manager, &project);
        manager
            .succeed(&first, "p", output.clone(), "image/png", "png")
            .unwrap();

        let second = queued(&mut manager, &project);
        assert_ne!(first, second);
        assert!(!output.exists());
        assert!(manager.mark_processing(&first).is_err());
        assert_eq!(manager.get(&project.id).unwrap().id, second);
    }
}

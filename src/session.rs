//! Per-user generation session.
//!
//! A [`Session`] owns everything one user works with: the API key, the
//! uploaded portrait, the face-isolation toggle and the four slots. Launching a
//! batch hands out a [`BatchTicket`] that carries a copy of the inputs and a
//! batch id; outcomes are only applied while that id is still current, so a
//! reset or a newer upload silently retires older in-flight batches.

use crate::archive;
use crate::batch::{self, BatchOrchestrator, BatchOutcome, BatchResult};
use crate::credential::Credential;
use crate::error::{PortraitVizError, Result};
use crate::image::SourceImage;

/// Inputs of one launched batch, frozen at launch.
#[derive(Debug, Clone)]
pub struct BatchTicket {
    /// Batch id; compare with [`Session::current_batch`].
    pub id: u64,
    /// Key in effect at launch.
    pub credential: Credential,
    /// Uploaded portrait.
    pub source: SourceImage,
    /// Toggle value at launch.
    pub isolate_face_only: bool,
}

impl BatchTicket {
    /// Runs the batch this ticket describes.
    pub async fn run(&self, orchestrator: &BatchOrchestrator) -> Result<BatchOutcome> {
        orchestrator
            .run_batch(&self.credential, &self.source, self.isolate_face_only)
            .await
    }
}

/// Session state shared between the user front end and the orchestrator.
#[derive(Debug, Default)]
pub struct Session {
    credential: Option<Credential>,
    source: Option<SourceImage>,
    isolate_face_only: bool,
    current_batch: u64,
    batch: BatchResult,
    advisory: Option<String>,
    error: Option<String>,
    credential_prompt: bool,
}

impl Session {
    /// Starts a session with an optional previously saved key.
    ///
    /// Without a key the credential prompt is raised immediately.
    pub fn new(credential: Option<Credential>) -> Self {
        let credential = credential.filter(|c| !c.is_empty());
        Self {
            credential_prompt: credential.is_none(),
            credential,
            ..Self::default()
        }
    }

    /// The current key, if any.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Replaces the key. An empty key clears it.
    pub fn set_credential(&mut self, credential: Credential) {
        if credential.is_empty() {
            self.clear_credential();
            return;
        }
        self.credential = Some(credential);
        self.credential_prompt = false;
        if self.error.as_deref().is_some_and(|e| e.contains("API key")) {
            self.error = None;
        }
    }

    /// Forgets the key.
    pub fn clear_credential(&mut self) {
        self.credential = None;
    }

    /// Current face-isolation toggle.
    pub fn isolate_face_only(&self) -> bool {
        self.isolate_face_only
    }

    /// Changes the toggle. Affects only batches launched afterwards.
    pub fn set_isolate_face_only(&mut self, isolate: bool) {
        self.isolate_face_only = isolate;
    }

    /// The uploaded portrait, if any.
    pub fn source(&self) -> Option<&SourceImage> {
        self.source.as_ref()
    }

    /// Id of the batch whose results are accepted.
    pub fn current_batch(&self) -> u64 {
        self.current_batch
    }

    /// The four slots.
    pub fn batch(&self) -> &BatchResult {
        &self.batch
    }

    /// Partial-success message of the last completed batch.
    pub fn advisory(&self) -> Option<&str> {
        self.advisory.as_deref()
    }

    /// Last batch-level error message.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// True while the launched batch has slots in flight.
    pub fn is_generating(&self) -> bool {
        self.batch
            .slots()
            .iter()
            .any(|slot| slot.state == batch::SlotState::Pending)
    }

    /// Returns true once per raised credential prompt.
    pub fn take_credential_prompt(&mut self) -> bool {
        std::mem::take(&mut self.credential_prompt)
    }

    /// Accepts a validated upload and launches a batch for it.
    ///
    /// Replaces the source image, freezes the four instructions into pending
    /// slots and supersedes any batch still in flight. Without a key nothing
    /// changes except that the credential prompt is raised.
    pub fn begin_batch(&mut self, source: SourceImage) -> Result<BatchTicket> {
        let Some(credential) = self.credential.clone() else {
            self.credential_prompt = true;
            self.error = Some(PortraitVizError::MissingCredential.to_string());
            return Err(PortraitVizError::MissingCredential);
        };

        self.current_batch += 1;
        self.source = Some(source.clone());
        self.batch = BatchResult::pending(batch::instructions(self.isolate_face_only));
        self.advisory = None;
        self.error = None;

        tracing::debug!(
            batch = self.current_batch,
            isolate_face_only = self.isolate_face_only,
            "launching batch"
        );
        Ok(BatchTicket {
            id: self.current_batch,
            credential,
            source,
            isolate_face_only: self.isolate_face_only,
        })
    }

    /// Applies a finished batch. Returns false and changes nothing when
    /// `batch_id` has been superseded.
    pub fn complete(&mut self, batch_id: u64, outcome: BatchOutcome) -> bool {
        if batch_id != self.current_batch {
            tracing::debug!(
                batch = batch_id,
                current = self.current_batch,
                "discarding stale batch result"
            );
            return false;
        }

        if let Some(message) = &outcome.credential_error {
            self.error = Some(message.clone());
            if self.credential.is_some() {
                self.credential_prompt = true;
            }
            self.credential = None;
        }
        self.advisory = outcome.advisory;
        self.batch = outcome.result;
        true
    }

    /// Records a batch that could not run at all.
    pub fn fail(&mut self, batch_id: u64, err: &PortraitVizError) -> bool {
        if batch_id != self.current_batch {
            return false;
        }
        if err.requires_credential() {
            self.credential_prompt = true;
            self.credential = None;
        }
        self.error = Some(err.to_string());
        self.batch = BatchResult::idle();
        true
    }

    /// Drops the upload and all results; in-flight batches are retired.
    pub fn reset(&mut self) {
        self.current_batch += 1;
        self.source = None;
        self.batch = BatchResult::idle();
        self.advisory = None;
        self.error = None;
    }

    /// Builds the download archive for the current results.
    pub fn export_archive(&self) -> Result<Vec<u8>> {
        let source = self.source.as_ref().ok_or_else(|| {
            PortraitVizError::ArchiveBuild("no image has been uploaded".into())
        })?;
        if self.batch.success_count() == 0 {
            return Err(PortraitVizError::ArchiveBuild(
                "no generated images to export".into(),
            ));
        }
        archive::build_archive(source, &self.batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests::{source, Script, ScriptedGenerator};
    use crate::batch::{SlotState, INSTRUCTION_TEMPLATES, ISOLATE_FACE_SUFFIX};
    use crate::image::codec;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn session() -> Session {
        Session::new(Some(Credential::new("key")))
    }

    async fn run(
        session: &mut Session,
        orchestrator: &BatchOrchestrator,
        source: SourceImage,
    ) -> bool {
        let ticket = session.begin_batch(source).unwrap();
        let outcome = ticket.run(orchestrator).await.unwrap();
        session.complete(ticket.id, outcome)
    }

    #[test]
    fn test_new_without_key_raises_prompt() {
        let mut session = Session::new(None);
        assert!(session.take_credential_prompt());
        assert!(!session.take_credential_prompt());

        let mut session = Session::new(Some(Credential::new("   ")));
        assert!(session.credential().is_none());
        assert!(session.take_credential_prompt());
    }

    #[test]
    fn test_begin_without_key_leaves_state() {
        let mut session = Session::new(None);
        session.take_credential_prompt();

        let err = session.begin_batch(source()).unwrap_err();
        assert!(matches!(err, PortraitVizError::MissingCredential));
        assert!(session.take_credential_prompt());
        assert!(session.source().is_none());
        assert_eq!(session.current_batch(), 0);
    }

    #[test]
    fn test_begin_freezes_pending_slots() {
        let mut session = session();
        let ticket = session.begin_batch(source()).unwrap();

        assert_eq!(ticket.id, 1);
        assert!(session.is_generating());
        for (i, slot) in session.batch().slots().iter().enumerate() {
            assert_eq!(slot.state, SlotState::Pending);
            assert_eq!(slot.instruction, INSTRUCTION_TEMPLATES[i]);
        }
    }

    #[tokio::test]
    async fn test_toggle_before_and_after_launch() {
        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedGenerator::all_succeed()));
        let mut session = session();

        session.set_isolate_face_only(true);
        let ticket = session.begin_batch(source()).unwrap();
        // flipping the toggle mid-flight must not touch the launched batch
        session.set_isolate_face_only(false);

        let outcome = ticket.run(&orchestrator).await.unwrap();
        assert!(session.complete(ticket.id, outcome));
        for slot in session.batch().slots() {
            assert!(slot.instruction.ends_with(ISOLATE_FACE_SUFFIX));
            assert!(slot.image().unwrap().instruction.ends_with(ISOLATE_FACE_SUFFIX));
        }

        assert!(run(&mut session, &orchestrator, source()).await);
        for slot in session.batch().slots() {
            assert!(!slot.instruction.ends_with(ISOLATE_FACE_SUFFIX));
        }
    }

    #[tokio::test]
    async fn test_rerun_after_reset_replaces_every_slot() {
        let mut session = session();

        let failing = BatchOrchestrator::new(Arc::new(ScriptedGenerator::with_scripts([
            (1, Script::FailNoImage),
        ])));
        assert!(run(&mut session, &failing, source()).await);
        assert_eq!(session.batch().failure_count(), 1);
        assert!(session.advisory().unwrap().contains("3 out of 4"));

        session.reset();
        assert!(session.source().is_none());
        assert!(session
            .batch()
            .slots()
            .iter()
            .all(|s| s.state == SlotState::Idle));
        assert_eq!(session.advisory(), None);

        let other = SourceImage::new(crate::image::EncodedImage::new(
            codec::encode(b"second upload"),
            "image/png",
        ));
        let working = BatchOrchestrator::new(Arc::new(ScriptedGenerator::all_succeed()));
        assert!(run(&mut session, &working, other.clone()).await);

        assert_eq!(session.source(), Some(&other));
        assert_eq!(session.batch().success_count(), 4);
        assert_eq!(session.advisory(), None);
    }

    #[tokio::test]
    async fn test_stale_batch_is_discarded() {
        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedGenerator::all_succeed()));
        let mut session = session();

        let stale = session.begin_batch(source()).unwrap();
        session.reset();
        let fresh = session.begin_batch(source()).unwrap();

        let stale_outcome = stale.run(&orchestrator).await.unwrap();
        assert!(!session.complete(stale.id, stale_outcome));
        assert!(session.is_generating());

        let fresh_outcome = fresh.run(&orchestrator).await.unwrap();
        assert!(session.complete(fresh.id, fresh_outcome));
        assert!(!session.is_generating());
        assert_eq!(session.batch().success_count(), 4);
    }

    #[tokio::test]
    async fn test_credential_rejection_prompts_once() {
        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedGenerator::with_scripts([
            (0, Script::RejectKey),
            (1, Script::RejectKey),
            (2, Script::RejectKey),
        ])));
        let mut session = session();
        assert!(!session.take_credential_prompt());

        assert!(run(&mut session, &orchestrator, source()).await);

        assert!(session.take_credential_prompt());
        assert!(!session.take_credential_prompt());
        assert!(session.credential().is_none());
        assert!(session.error().unwrap().contains("API key not valid"));
        assert_eq!(session.batch().success_count(), 1);

        session.set_credential(Credential::new("new-key"));
        assert_eq!(session.error(), None);
        assert!(!session.take_credential_prompt());
    }

    #[tokio::test]
    async fn test_invalid_upload_never_reaches_orchestrator() {
        let generator = Arc::new(ScriptedGenerator::all_succeed());
        let orchestrator = BatchOrchestrator::new(generator.clone());
        let mut session = session();
        assert!(run(&mut session, &orchestrator, source()).await);
        let before = session.batch().clone();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "definitely not an image").unwrap();

        let err = codec::read_upload(&path).await.unwrap_err();
        assert!(matches!(err, PortraitVizError::InvalidUpload(_)));

        assert_eq!(generator.calls.load(Ordering::SeqCst), 4);
        assert_eq!(session.batch(), &before);
        assert_eq!(session.source(), Some(&source()));
        assert_eq!(session.current_batch(), 1);
    }

    #[tokio::test]
    async fn test_export_archive_counts_successes() {
        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedGenerator::with_scripts([
            (0, Script::FailNoImage),
            (3, Script::FailNoImage),
        ])));
        let mut session = session();
        assert!(session.export_archive().is_err());

        let upload = SourceImage::new(crate::image::EncodedImage::new(
            codec::encode(b"portrait"),
            "image/jpeg",
        ));
        assert!(run(&mut session, &orchestrator, upload).await);

        let bytes = session.export_archive().unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
    }

    #[test]
    fn test_fail_records_error() {
        let mut session = session();
        let ticket = session.begin_batch(source()).unwrap();
        assert!(session.fail(ticket.id, &PortraitVizError::MissingCredential));
        assert!(session.take_credential_prompt());
        assert!(!session.is_generating());
        assert!(session.error().is_some());
    }
}

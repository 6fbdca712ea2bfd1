use crate::ingest::{
    discover_markdown_files, discover_pdf_files, document_id_for, sidecar_path, FailedPdf,
    OcrReport,
};
use crate::traits::{DocumentAnalyzer, MemoryStore};
use crate::{IngestError, MemoryAnswer, WorkflowError};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowReport {
    pub ocr: OcrReport,
    pub imported: Vec<String>,
}

pub struct RagWorkflow<A, M>
where
    A: DocumentAnalyzer,
    M: MemoryStore,
{
    analyzer: A,
    memory: M,
}

impl<A, M> RagWorkflow<A, M>
where
    A: DocumentAnalyzer + Send + Sync,
    M: MemoryStore + Send + Sync,
{
    pub fn new(analyzer: A, memory: M) -> Self {
        Self { analyzer, memory }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub async fn run(&self, folder: &Path) -> Result<WorkflowReport, WorkflowError> {
        let ocr = self.ocr_pdf_files(folder).await;
        let imported = self.import_markdown_files(folder).await?;
        Ok(WorkflowReport { ocr, imported })
    }

    pub async fn ocr_pdf_files(&self, folder: &Path) -> OcrReport {
        let mut report = OcrReport::default();

        for pdf in discover_pdf_files(folder) {
            let sidecar = sidecar_path(&pdf);

            match tokio::fs::try_exists(&sidecar).await {
                Ok(true) => {
                    info!(
                        path = %pdf.display(),
                        "Skipping {} because it already has a markdown file",
                        pdf.display()
                    );
                    report.skipped.push(pdf);
                    continue;
                }
                Ok(false) => {}
                Err(failure) => {
                    record_failure(&mut report, pdf, &IngestError::from(failure));
                    continue;
                }
            }

            match self.convert_pdf(&pdf, &sidecar).await {
                Ok(()) => {
                    info!(path = %sidecar.display(), "Created: {}", sidecar.display());
                    report.created.push(sidecar);
                }
                Err(failure) => record_failure(&mut report, pdf, &failure),
            }
        }

        report
    }

    async fn convert_pdf(&self, pdf: &Path, sidecar: &Path) -> Result<(), IngestError> {
        let content = tokio::fs::read(pdf).await?;
        let markdown = self.analyzer.analyze_to_markdown(content).await?;
        tokio::fs::write(sidecar, markdown).await?;
        Ok(())
    }

    /// Imports in discovery order and stops at the first failure.
    pub async fn import_markdown_files(&self, folder: &Path) -> Result<Vec<String>, WorkflowError> {
        let mut imported = Vec::new();

        for path in discover_markdown_files(folder) {
            let document_id = document_id_for(&path)?;
            let absolute = absolute_path(&path).await?;

            self.memory
                .import_document(&absolute, &document_id)
                .await
                .map_err(|source| WorkflowError::Import {
                    document_id: document_id.clone(),
                    source,
                })?;

            info!(
                document_id = %document_id,
                "Successfully imported File Name: {}",
                document_id
            );
            imported.push(document_id);
        }

        Ok(imported)
    }

    pub async fn ask_question(&self, question: &str) -> Result<MemoryAnswer, WorkflowError> {
        let answer = self.memory.ask(question).await.map_err(WorkflowError::Ask)?;
        println!("{}", format_exchange(question, &answer.result));
        Ok(answer)
    }
}

fn record_failure(report: &mut OcrReport, pdf: PathBuf, failure: &IngestError) {
    error!(
        path = %pdf.display(),
        "Error processing OCR for {}: {}",
        pdf.display(),
        failure
    );
    report.failed.push(FailedPdf {
        path: pdf,
        reason: failure.to_string(),
    });
}

pub fn format_exchange(question: &str, answer: &str) -> String {
    format!("Question: {question}\n\nAnswer: {answer}")
}

async fn absolute_path(path: &Path) -> Result<PathBuf, IngestError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(tokio::fs::canonicalize(path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeAnalyzer {
        calls: Mutex<usize>,
        fail_on: HashSet<Vec<u8>>,
    }

    impl FakeAnalyzer {
        fn calls(&self) -> usize {
            self.calls.lock().map(|calls| *calls).unwrap_or_default()
        }
    }

    #[async_trait]
    impl DocumentAnalyzer for FakeAnalyzer {
        async fn analyze_to_markdown(&self, content: Vec<u8>) -> Result<String, IngestError> {
            if let Ok(mut calls) = self.calls.lock() {
                *calls += 1;
            }
            if self.fail_on.contains(&content) {
                return Err(IngestError::AnalysisFailed("InvalidContent: corrupt".to_string()));
            }
            Ok(format!("# OCR\n\n{}", String::from_utf8_lossy(&content)))
        }
    }

    #[derive(Default)]
    struct FakeMemory {
        imported: Mutex<Vec<(PathBuf, String)>>,
        fail_on: Option<String>,
        answer: String,
    }

    impl FakeMemory {
        fn imported_ids(&self) -> Vec<String> {
            self.imported
                .lock()
                .map(|imported| imported.iter().map(|(_, id)| id.clone()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl MemoryStore for FakeMemory {
        async fn import_document(&self, path: &Path, document_id: &str) -> Result<(), MemoryError> {
            if self.fail_on.as_deref() == Some(document_id) {
                return Err(MemoryError::Request("index unavailable".to_string()));
            }
            self.imported
                .lock()
                .map_err(|error| MemoryError::Request(error.to_string()))?
                .push((path.to_path_buf(), document_id.to_string()));
            Ok(())
        }

        async fn ask(&self, question: &str) -> Result<MemoryAnswer, MemoryError> {
            Ok(MemoryAnswer {
                question: question.to_string(),
                result: self.answer.clone(),
                no_result: false,
                relevant_sources: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn run_creates_missing_sidecars_and_imports_everything(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        fs::write(base.join("a.pdf"), b"alpha")?;
        fs::write(base.join("b.pdf"), b"beta")?;
        fs::write(base.join("b.pdf.md"), "# existing")?;

        let workflow = RagWorkflow::new(FakeAnalyzer::default(), FakeMemory::default());
        let report = workflow.run(base).await?;

        assert_eq!(workflow.analyzer.calls(), 1);
        assert_eq!(fs::read_to_string(base.join("a.pdf.md"))?, "# OCR\n\nalpha");
        assert_eq!(fs::read_to_string(base.join("b.pdf.md"))?, "# existing");
        assert_eq!(report.ocr.created, vec![base.join("a.pdf.md")]);
        assert_eq!(report.ocr.skipped, vec![base.join("b.pdf")]);
        assert_eq!(report.imported, vec!["a.pdf.md", "b.pdf.md"]);

        let imported = workflow.memory().imported.lock().map_err(|e| e.to_string())?;
        assert!(imported.iter().all(|(path, _)| path.is_absolute()));
        Ok(())
    }

    #[tokio::test]
    async fn second_ocr_pass_does_not_reanalyze() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.pdf"), b"alpha")?;
        fs::write(dir.path().join("b.pdf"), b"beta")?;

        let workflow = RagWorkflow::new(FakeAnalyzer::default(), FakeMemory::default());
        workflow.ocr_pdf_files(dir.path()).await;
        let second = workflow.ocr_pdf_files(dir.path()).await;

        assert_eq!(workflow.analyzer.calls(), 2);
        assert!(second.created.is_empty());
        assert_eq!(second.skipped.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn failing_pdf_does_not_stop_the_others() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        fs::write(base.join("1.pdf"), b"one")?;
        fs::write(base.join("2.pdf"), b"corrupt")?;
        fs::write(base.join("3.pdf"), b"three")?;

        let analyzer = FakeAnalyzer {
            fail_on: HashSet::from([b"corrupt".to_vec()]),
            ..FakeAnalyzer::default()
        };
        let workflow = RagWorkflow::new(analyzer, FakeMemory::default());
        let report = workflow.ocr_pdf_files(base).await;

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, base.join("2.pdf"));
        assert!(report.failed[0].reason.contains("InvalidContent"));
        assert!(!base.join("2.pdf.md").exists());
        assert!(base.join("3.pdf.md").exists());
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn unverifiable_sidecar_is_a_failure_not_a_new_ocr_call(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        // The PDF name fits the file name limit, its sidecar name does not.
        let pdf = dir.path().join(format!("{}.pdf", "a".repeat(249)));
        fs::write(&pdf, b"alpha")?;

        let workflow = RagWorkflow::new(FakeAnalyzer::default(), FakeMemory::default());
        let report = workflow.ocr_pdf_files(dir.path()).await;

        assert_eq!(workflow.analyzer.calls(), 0);
        assert!(report.created.is_empty());
        assert!(report.skipped.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, pdf);
        Ok(())
    }

    #[tokio::test]
    async fn import_stops_at_first_failure() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in ["a.md", "b.md", "c.md"] {
            fs::write(dir.path().join(name), "text")?;
        }

        let memory = FakeMemory {
            fail_on: Some("b.md".to_string()),
            ..FakeMemory::default()
        };
        let workflow = RagWorkflow::new(FakeAnalyzer::default(), memory);
        let result = workflow.import_markdown_files(dir.path()).await;

        match result {
            Err(WorkflowError::Import { document_id, .. }) => assert_eq!(document_id, "b.md"),
            other => panic!("expected import failure, got {other:?}"),
        }
        assert_eq!(workflow.memory().imported_ids(), vec!["a.md"]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_folder_runs_cleanly() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let workflow = RagWorkflow::new(FakeAnalyzer::default(), FakeMemory::default());

        let report = workflow.run(dir.path()).await?;

        assert_eq!(report, WorkflowReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn ask_returns_store_answer_verbatim() -> Result<(), WorkflowError> {
        let memory = FakeMemory {
            answer: "42".to_string(),
            ..FakeMemory::default()
        };
        let workflow = RagWorkflow::new(FakeAnalyzer::default(), memory);

        let answer = workflow.ask_question("What is X?").await?;

        assert_eq!(answer.result, "42");
        assert_eq!(
            format_exchange("What is X?", &answer.result),
            "Question: What is X?\n\nAnswer: 42"
        );
        Ok(())
    }
}

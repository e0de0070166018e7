//! Turns one segment's analytics tables into retrieval passages.

use common::error::AppError;
use tracing::debug;

use crate::{
    reconcile::{self, ModalEntry, ReconciledQuestion, SignificantEntry},
    sources::{ChiSquaredRow, SegmentDataSource, SegmentModeRow},
};

/// One retrieval passage plus the structured fields it was rendered from.
/// The structured fields travel into the vector store as row metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub text: String,
    pub question_text: String,
    pub modal_answer: String,
    pub significant_answers: String,
}

/// Builds the passages for the segment a [`SegmentDataSource`] points at.
pub struct SegmentKnowledgeBuilder {
    source: SegmentDataSource,
}

impl SegmentKnowledgeBuilder {
    pub fn new(source: SegmentDataSource) -> Self {
        Self { source }
    }

    /// Load the modal-answer and chi-squared tables and produce one passage
    /// per reconciled question. A missing table is fatal for this segment.
    pub async fn build(&self) -> Result<Vec<Passage>, AppError> {
        let modal_rows = self.source.segment_modes().await?;
        let chi_rows = self.source.chisquared().await?;
        let passages = build_passages(&modal_rows, &chi_rows, self.source.segment());
        debug!(
            segment = self.source.segment(),
            passages = passages.len(),
            "Built segment passages"
        );
        Ok(passages)
    }
}

/// Pure assembly behind [`SegmentKnowledgeBuilder::build`], split out so
/// tests can drive it without object storage.
pub fn build_passages(
    modal_rows: &[SegmentModeRow],
    chi_rows: &[ChiSquaredRow],
    segment: &str,
) -> Vec<Passage> {
    let modal: Vec<ModalEntry> = modal_rows
        .iter()
        .map(|row| ModalEntry {
            q_code: reconcile::strip_code_markers(&row.q_code),
            title: row.title.clone(),
            mode: format!(
                "{} (proportion of respondents: {})",
                row.mode,
                format_proportion(row.proportion)
            ),
            kind: row.qtype,
        })
        .collect();

    // Whether the weighted column is in play is a property of the whole
    // table, not of individual rows.
    let use_weighted = chi_rows
        .iter()
        .any(|row| row.weighted_category_percentages.is_some());

    let significant: Vec<SignificantEntry> = chi_rows
        .iter()
        .filter(|row| row.segment == segment)
        .map(|row| SignificantEntry {
            q_code: reconcile::strip_code_markers(&row.q_code),
            title: row.title.clone(),
            answers: significant_answer_strings(row, use_weighted),
        })
        .collect();

    reconcile::reconcile(&modal, &significant)
        .into_iter()
        .map(render_passage)
        .collect()
}

fn significant_answer_strings(row: &ChiSquaredRow, use_weighted: bool) -> Vec<String> {
    let percentages = if use_weighted {
        row.weighted_category_percentages.as_deref()
    } else {
        row.category_percentages.as_deref()
    }
    .unwrap_or(&[]);

    row.sig_more_category
        .iter()
        .zip(percentages)
        .map(|(category, value)| {
            format!(
                "{category} (proportion of respondents: {})",
                format_proportion(value / 100.0)
            )
        })
        .collect()
}

/// Round to two decimals and render with at least one decimal digit, the
/// way the analytics exports spell proportions ("0.3", "1.0").
fn format_proportion(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let text = rounded.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

fn render_passage(question: ReconciledQuestion) -> Passage {
    let significant_answers = question.significant_answers.join("; ");
    let text = format!(
        "Survey Question: {}\nModal Answers: {}\nSignificant Answers: {}",
        question.title, question.mode, significant_answers
    );
    Passage {
        text,
        question_text: question.title,
        modal_answer: question.mode,
        significant_answers,
    }
}

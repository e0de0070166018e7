//! Question-code reconciliation between the chi-squared excerpts and the
//! modal-answer table.
//!
//! The two tables key questions differently. Modal rows are tagged with the
//! namespace their code lives in (full variable name or abbreviated
//! shortname), while chi-squared rows mix both without a tag. Matching runs
//! in two passes: join on variable names first, then canonicalize whatever
//! found no partner into the shortname namespace and retry.

use std::collections::{HashMap, HashSet};

use crate::sources::QuestionCodeKind;

/// A modal answer ready to join, with its code markers already stripped and
/// the proportion suffix already applied.
#[derive(Debug, Clone)]
pub struct ModalEntry {
    pub q_code: String,
    pub title: String,
    pub mode: String,
    pub kind: QuestionCodeKind,
}

/// Rendered significant-answer strings for one chi-squared row.
#[derive(Debug, Clone)]
pub struct SignificantEntry {
    pub q_code: String,
    pub title: String,
    pub answers: Vec<String>,
}

/// A question with its modal answer and any significant answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledQuestion {
    pub title: String,
    pub mode: String,
    pub significant_answers: Vec<String>,
}

/// Strip the grid and feedback markers a question code may carry.
pub fn strip_code_markers(code: &str) -> String {
    code.replace("_gg", "").replace("_fb", "")
}

/// Collapse a variable name to its shortname by dropping the last
/// underscore-delimited part. Trailing `ord` and `iso` parts are meaningful
/// and stay; codes without an underscore pass through unchanged.
pub fn to_shortname(code: &str) -> String {
    match code.rsplit_once('_') {
        None => code.to_owned(),
        Some((_, "ord" | "iso")) => code.to_owned(),
        Some((head, _)) => head.to_owned(),
    }
}

/// Shortname form used for the second join pass. One rename shipped with the
/// upstream analytics exports and the join depends on it.
pub fn canonical_shortname(code: &str) -> String {
    let shortname = to_shortname(code);
    if shortname == "sbeh_us_insuranceownership_cb" {
        "sbeh_us_insuranceintenders_cb".to_owned()
    } else {
        shortname
    }
}

/// Join modal answers with significant answers across both code namespaces.
///
/// Every modal row survives, with empty significant answers when nothing
/// matched. Chi-squared rows that stay unmatched after the shortname retry
/// are dropped. Shortname-pass rows come first, mirroring the layout of the
/// upstream exports, and titles lose any non-breaking spaces.
pub fn reconcile(modal: &[ModalEntry], significant: &[SignificantEntry]) -> Vec<ReconciledQuestion> {
    let grouped = group_answers(significant.iter().map(|entry| {
        (
            entry.q_code.clone(),
            entry.title.clone(),
            entry.answers.as_slice(),
        )
    }));

    let mut consumed: HashSet<(String, String)> = HashSet::new();
    let mut varname_rows = Vec::new();
    for entry in modal
        .iter()
        .filter(|entry| entry.kind == QuestionCodeKind::Varname)
    {
        let key = (entry.q_code.clone(), entry.title.clone());
        let answers = match grouped.get(&key) {
            Some(answers) => {
                consumed.insert(key);
                answers.clone()
            }
            None => Vec::new(),
        };
        varname_rows.push(ReconciledQuestion {
            title: clean_title(&entry.title),
            mode: entry.mode.clone(),
            significant_answers: answers,
        });
    }

    // Codes whose (code, title) pair matched no variable-name modal row get
    // retried in the shortname namespace.
    let retry_codes: HashSet<&str> = grouped
        .keys()
        .filter(|key| !consumed.contains(*key))
        .map(|key| key.0.as_str())
        .collect();

    let regrouped = group_answers(
        significant
            .iter()
            .filter(|entry| retry_codes.contains(entry.q_code.as_str()))
            .map(|entry| {
                (
                    canonical_shortname(&entry.q_code),
                    entry.title.clone(),
                    entry.answers.as_slice(),
                )
            }),
    );

    let mut rows = Vec::new();
    for entry in modal
        .iter()
        .filter(|entry| entry.kind == QuestionCodeKind::Shortname)
    {
        let key = (entry.q_code.clone(), entry.title.clone());
        rows.push(ReconciledQuestion {
            title: clean_title(&entry.title),
            mode: entry.mode.clone(),
            significant_answers: regrouped.get(&key).cloned().unwrap_or_default(),
        });
    }

    rows.extend(varname_rows);
    rows
}

/// Concatenate answer lists per (code, title), keeping input order within a
/// group.
fn group_answers<'a, I>(entries: I) -> HashMap<(String, String), Vec<String>>
where
    I: Iterator<Item = (String, String, &'a [String])>,
{
    let mut grouped: HashMap<(String, String), Vec<String>> = HashMap::new();
    for (q_code, title, answers) in entries {
        grouped
            .entry((q_code, title))
            .or_default()
            .extend(answers.iter().cloned());
    }
    grouped
}

fn clean_title(title: &str) -> String {
    title.replace('\u{a0}', "")
}

use anyhow::Result;
use civic_core::schema::{Legislator, Position, VoteRecord};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub struct VaultPaths {
    pub root: PathBuf,
    pub index_dir: PathBuf,
    pub legislators_dir: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            index_dir: root.join("00_Index"),
            legislators_dir: root.join("Legislators"),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.index_dir)?;
        fs::create_dir_all(&self.legislators_dir)?;
        Ok(())
    }
}

/// Writes `Legislators/{id}.md` and refreshes the legislator MOC.
pub fn write_vote_note(
    vault_root: &Path,
    legislator: &Legislator,
    votes: &[VoteRecord],
    generated_at: OffsetDateTime,
) -> Result<PathBuf> {
    let paths = VaultPaths::new(vault_root);
    paths.ensure()?;

    let note_path = paths
        .legislators_dir
        .join(format!("{}.md", note_stem(&legislator.id)));
    fs::write(&note_path, render_vote_note(legislator, votes, generated_at)?)?;

    build_legislator_index(&paths)?;
    Ok(note_path)
}

fn render_vote_note(
    legislator: &Legislator,
    votes: &[VoteRecord],
    generated_at: OffsetDateTime,
) -> Result<String> {
    let mut md = String::new();
    md.push_str("---\n");
    md.push_str(&format!("id: {}\n", legislator.id));
    md.push_str(&format!("name: \"{}\"\n", legislator.full_name.replace('"', "'")));
    md.push_str(&format!("jurisdiction: {}\n", legislator.jurisdiction));
    md.push_str(&format!("vote_count: {}\n", votes.len()));
    md.push_str(&format!("generated_at: {}\n", generated_at.format(&Rfc3339)?));
    md.push_str("---\n\n");

    md.push_str(&format!("# {}\n\n", legislator.full_name));

    md.push_str("## Positions\n");
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for vote in votes {
        *counts.entry(vote.position.to_string()).or_insert(0) += 1;
    }
    if counts.is_empty() {
        md.push_str("_No recorded votes._\n\n");
    } else {
        for (position, count) in &counts {
            md.push_str(&format!("- {position}: {count}\n"));
        }
        md.push('\n');
    }

    md.push_str("## Votes\n");
    if votes.is_empty() {
        md.push_str("_No recorded votes._\n");
        return Ok(md);
    }
    md.push_str("| Date | Bill | Question | Vote | Result | Yea-Nay-NV |\n");
    md.push_str("|---|---|---|---|---|---|\n");
    for vote in votes {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {}-{}-{} |\n",
            vote.date,
            cell(&vote.bill_number),
            cell(&vote.question),
            position_cell(&vote.position),
            cell(&vote.result),
            vote.yea_count,
            vote.nay_count,
            vote.not_voting_count,
        ));
    }
    Ok(md)
}

fn position_cell(position: &Position) -> String {
    match position {
        Position::Yea | Position::Nay => format!("**{position}**"),
        _ => cell(position.as_str()),
    }
}

fn cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn note_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Regenerates `00_Index/MOC - Legislators.md` from the notes on disk.
pub fn build_legislator_index(paths: &VaultPaths) -> Result<()> {
    let mut lines: Vec<String> = Vec::new();
    lines.push("# MOC - Legislators".to_string());
    lines.push(String::new());
    lines.push("This index is generated. Do not edit manually.".to_string());
    lines.push(String::new());

    let mut links: Vec<String> = fs::read_dir(&paths.legislators_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            Some(format!("- [[Legislators/{stem}|{stem}]]"))
        })
        .collect();
    links.sort();

    if links.is_empty() {
        lines.push("_No legislator notes found._".to_string());
    } else {
        lines.extend(links);
    }

    fs::write(paths.index_dir.join("MOC - Legislators.md"), lines.join("\n"))?;
    Ok(())
}

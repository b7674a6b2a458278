use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use globset::GlobMatcher;
use serde::Serialize;

use crate::{
    archive::ReadingArchive,
    context::Context,
    error::Result,
    events::EventHeader,
    names::TypeName,
    walker,
};

/// Event counts by kind for one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveCensus {
    pub relative_path: PathBuf,
    pub by_kind: BTreeMap<String, u64>,
    pub unreadable: u64,
}

impl ArchiveCensus {
    pub fn total(&self) -> u64 {
        self.by_kind.values().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventCensus {
    pub archives: Vec<ArchiveCensus>,
    pub by_kind: BTreeMap<String, u64>,
}

impl EventCensus {
    pub fn total(&self) -> u64 {
        self.by_kind.values().sum()
    }

    pub fn format_human(&self) -> String {
        let mut out = String::new();
        for a in &self.archives {
            out.push_str(&format!(
                "{}: {} events\n",
                a.relative_path.display(),
                a.total()
            ));
            for (kind, n) in &a.by_kind {
                out.push_str(&format!("  {kind}: {n}\n"));
            }
        }
        out.push_str(&format!("total: {} events\n", self.total()));
        for (kind, n) in &self.by_kind {
            out.push_str(&format!("  {kind}: {n}\n"));
        }
        out
    }
}

/// Count the events of every archive under `root` by their type tag.
///
/// Only the tag is decoded, so unknown event kinds are counted too.
pub fn count_events(
    root: &Path,
    only: Option<&GlobMatcher>,
) -> Result<EventCensus> {
    let mut census = EventCensus::default();
    for archive in walker::discover_archives(root, only)? {
        let mut ra = match ReadingArchive::open(&archive.absolute_path) {
            Ok(ra) => ra,
            Err(e) => {
                tracing::error!("skipping archive: {e}");
                continue;
            }
        };

        let mut entry = ArchiveCensus {
            relative_path: archive.relative_path,
            ..ArchiveCensus::default()
        };
        for header in ra.records::<EventHeader>() {
            match header {
                Ok(h) => *entry.by_kind.entry(h.kind).or_default() += 1,
                Err(e) => {
                    entry.unreadable += 1;
                    tracing::debug!("unreadable event: {e}");
                }
            }
        }
        tracing::info!(
            archive = %entry.relative_path.display(),
            events = entry.total(),
            "counted"
        );

        for (kind, n) in &entry.by_kind {
            *census.by_kind.entry(kind.clone()).or_default() += n;
        }
        census.archives.push(entry);
    }
    Ok(census)
}

/// Context counts and referenced types for one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveTypes {
    pub relative_path: PathBuf,
    pub contexts: u64,
    pub eligible: u64,
    pub unreadable: u64,
    /// Types declared in the analyzed solution.
    pub local_types: BTreeSet<TypeName>,
    /// Types from referenced libraries.
    pub library_types: BTreeSet<TypeName>,
}

impl ArchiveTypes {
    fn add(&mut self, t: TypeName) {
        if t.is_local() {
            self.local_types.insert(t);
        } else {
            self.library_types.insert(t);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeCensus {
    pub archives: Vec<ArchiveTypes>,
    pub contexts: u64,
    pub eligible: u64,
    pub local_types: BTreeSet<TypeName>,
    pub library_types: BTreeSet<TypeName>,
}

impl TypeCensus {
    pub fn format_human(&self, list: bool) -> String {
        let mut out = String::new();
        for a in &self.archives {
            out.push_str(&format!(
                "{}: {} contexts ({} eligible), {} local / {} library types\n",
                a.relative_path.display(),
                a.contexts,
                a.eligible,
                a.local_types.len(),
                a.library_types.len()
            ));
        }
        out.push_str(&format!(
            "total: {} contexts ({} eligible), {} local / {} library types\n",
            self.contexts,
            self.eligible,
            self.local_types.len(),
            self.library_types.len()
        ));
        if list {
            for t in &self.local_types {
                out.push_str(&format!("  local   {t}\n"));
            }
            for t in &self.library_types {
                out.push_str(&format!("  library {t}\n"));
            }
        }
        out
    }
}

/// Collect the types referenced by the contexts of every archive under
/// `root`, split into local and library types.
pub fn collect_types(
    root: &Path,
    only: Option<&GlobMatcher>,
) -> Result<TypeCensus> {
    let mut census = TypeCensus::default();
    for archive in walker::discover_archives(root, only)? {
        let mut ra = match ReadingArchive::open(&archive.absolute_path) {
            Ok(ra) => ra,
            Err(e) => {
                tracing::error!("skipping archive: {e}");
                continue;
            }
        };

        let mut entry = ArchiveTypes {
            relative_path: archive.relative_path,
            ..ArchiveTypes::default()
        };
        for ctx in ra.records::<Context>() {
            let ctx = match ctx {
                Ok(ctx) => ctx,
                Err(e) => {
                    entry.unreadable += 1;
                    tracing::debug!("unreadable context: {e}");
                    continue;
                }
            };
            entry.contexts += 1;
            if ctx.is_eligible_for_mining() {
                entry.eligible += 1;
            }
            for t in ctx.sst.referenced_types() {
                entry.add(t);
            }
        }
        tracing::info!(
            archive = %entry.relative_path.display(),
            contexts = entry.contexts,
            types = entry.local_types.len() + entry.library_types.len(),
            "collected"
        );

        census.contexts += entry.contexts;
        census.eligible += entry.eligible;
        census.local_types.extend(entry.local_types.iter().cloned());
        census.library_types.extend(entry.library_types.iter().cloned());
        census.archives.push(entry);
    }
    Ok(census)
}

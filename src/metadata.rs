//! The report metadata catalog.
//!
//! Every report in the corpus is described by one row of a CSV table with
//! the columns `COMPANY`, `FROM YEAR`, `TO YEAR` and `ATTACHMENT` (the URL
//! the PDF was published at). Uploaded files are matched back to their row
//! by filename, and the distinct company names form the canonical list the
//! [`EntityResolver`](crate::resolver::EntityResolver) resolves against.

use std::{
    collections::{BTreeSet, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    io::Read,
    path::{Path, PathBuf},
};

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::{doc_id::DocumentKey, error::Result};

/// Metadata for one ingested report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub company: String,
    pub from_year: String,
    pub to_year: String,
    pub source_url: String,
    pub local_path: PathBuf,
}

impl DocumentMetadata {
    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(&self.company, &self.from_year, &self.to_year)
    }
}

/// One row of the metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogRow {
    #[serde(rename = "COMPANY")]
    pub company: String,
    #[serde(rename = "FROM YEAR")]
    pub from_year: String,
    #[serde(rename = "TO YEAR")]
    pub to_year: String,
    #[serde(rename = "ATTACHMENT", default)]
    pub attachment: String,
}

impl CatalogRow {
    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(&self.company, &self.from_year, &self.to_year)
    }

    /// The filename the attachment URL points at, percent-decoded.
    fn attachment_filename(&self) -> Option<String> {
        let without_query = self.attachment.split(['?', '#']).next()?;
        let basename = without_query.rsplit('/').next()?.trim();
        if basename.is_empty() {
            return None;
        }
        Some(percent_decode_str(basename).decode_utf8_lossy().into_owned())
    }

    fn to_metadata(&self, local_path: &Path) -> DocumentMetadata {
        DocumentMetadata {
            company: self.company.clone(),
            from_year: self.from_year.clone(),
            to_year: self.to_year.clone(),
            source_url: self.attachment.clone(),
            local_path: local_path.to_path_buf(),
        }
    }
}

/// The loaded metadata table.
#[derive(Debug, Clone, Default)]
pub struct MetadataCatalog {
    source: Option<PathBuf>,
    rows: Vec<CatalogRow>,
}

impl MetadataCatalog {
    /// Load the catalog from a CSV file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut catalog = Self::from_reader(file)?;
        catalog.source = Some(path.to_path_buf());
        tracing::debug!(
            path = %path.display(),
            rows = catalog.rows.len(),
            "loaded metadata catalog"
        );
        Ok(catalog)
    }

    /// Parse a catalog from CSV data. Headers and cells are trimmed.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let rows = csv.deserialize().collect::<csv::Result<Vec<CatalogRow>>>()?;
        Ok(Self { source: None, rows })
    }

    pub fn from_rows(rows: Vec<CatalogRow>) -> Self {
        Self { source: None, rows }
    }

    /// Re-read the catalog from the file it was loaded from.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(path) = self.source.clone() {
            *self = Self::load(&path)?;
        }
        Ok(())
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn rows(&self) -> &[CatalogRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Find the metadata for an uploaded file by its filename.
    ///
    /// The attachment URL's basename wins; the derived canonical filename
    /// is tried second.
    pub fn match_file(&self, local_path: &Path) -> Option<DocumentMetadata> {
        let file_name = local_path.file_name()?.to_str()?;

        self.rows
            .iter()
            .find(|row| row.attachment_filename().as_deref() == Some(file_name))
            .or_else(|| {
                self.rows.iter().find(|row| row.key().filename() == file_name)
            })
            .map(|row| row.to_metadata(local_path))
    }

    /// Distinct canonical company names, sorted.
    pub fn companies(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| row.company.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every year a company has a report starting or ending in, sorted.
    pub fn years_for_company(&self, company: &str) -> Vec<String> {
        let mut years = BTreeSet::new();
        for row in self.rows.iter().filter(|row| row.company == company) {
            years.insert(row.from_year.clone());
            years.insert(row.to_year.clone());
        }
        years.into_iter().collect()
    }

    /// Rows for the given companies, narrowed to rows starting or ending in
    /// `year` when one is given.
    pub fn documents_for(
        &self,
        companies: &[String],
        year: Option<&str>,
    ) -> Vec<&CatalogRow> {
        self.rows
            .iter()
            .filter(|row| companies.contains(&row.company))
            .filter(|row| {
                year.is_none_or(|y| row.from_year == y || row.to_year == y)
            })
            .collect()
    }

    /// A stable hash of the canonical company list.
    ///
    /// The company registry compares fingerprints to decide whether it has
    /// to rebuild.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.companies().hash(&mut hasher);
        hasher.finish()
    }
}

/// The identity of a report: one company over one reporting period.
///
/// Both the on-disk filename of a report and the ids of its chunks are
/// derived from this triple, so re-ingesting the same report always lands
/// on the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub company: String,
    pub from_year: String,
    pub to_year: String,
}

impl DocumentKey {
    pub fn new(company: &str, from_year: &str, to_year: &str) -> Self {
        Self {
            company: company.to_string(),
            from_year: from_year.to_string(),
            to_year: to_year.to_string(),
        }
    }

    /// Derive the canonical PDF filename for this report.
    ///
    /// Non-alphanumeric characters are stripped from the company name and
    /// runs of whitespace collapse to a single underscore.
    ///
    /// # Examples
    ///
    /// ```
    /// use brsr_search::doc_id::DocumentKey;
    ///
    /// let key = DocumentKey::new("Godrej Agrovet Ltd.", "2023", "2024");
    /// assert_eq!(key.filename(), "Godrej_Agrovet_Ltd_2023_2024.pdf");
    /// ```
    pub fn filename(&self) -> String {
        format!(
            "{}_{}_{}.pdf",
            clean_company_name(&self.company),
            self.from_year,
            self.to_year
        )
    }

    /// Derive the id of the chunk at `index` within this report.
    ///
    /// # Examples
    ///
    /// ```
    /// use brsr_search::doc_id::DocumentKey;
    ///
    /// let key = DocumentKey::new("Acme Corp", "2022", "2023");
    /// assert_eq!(key.chunk_id(3), "Acme_Corp_2022_2023_chunk_3");
    /// ```
    pub fn chunk_id(&self, index: usize) -> String {
        format!(
            "{}_{}_{}_chunk_{index}",
            self.company.replace(' ', "_"),
            self.from_year,
            self.to_year
        )
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}-{})", self.company, self.from_year, self.to_year)
    }
}

fn clean_company_name(company: &str) -> String {
    let kept: String = company
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_deterministic() {
        let a = DocumentKey::new("Acme Corp", "2022", "2023");
        let b = DocumentKey::new("Acme Corp", "2022", "2023");
        assert_eq!(a.filename(), b.filename());
    }

    #[test]
    fn filename_strips_punctuation_and_collapses_whitespace() {
        let key = DocumentKey::new("  Tata  Steel (India) & Co. ", "2021", "2022");
        assert_eq!(key.filename(), "Tata_Steel_India_Co_2021_2022.pdf");
    }

    #[test]
    fn different_periods_differ() {
        let a = DocumentKey::new("Acme Corp", "2022", "2023");
        let b = DocumentKey::new("Acme Corp", "2023", "2024");
        assert_ne!(a.filename(), b.filename());
        assert_ne!(a.chunk_id(0), b.chunk_id(0));
    }

    #[test]
    fn chunk_ids_are_unique_within_a_document() {
        let key = DocumentKey::new("Acme Corp", "2022", "2023");
        let ids: std::collections::HashSet<_> =
            (0..50).map(|i| key.chunk_id(i)).collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn display_names_company_and_period() {
        let key = DocumentKey::new("Acme Corp", "2022", "2023");
        assert_eq!(key.to_string(), "Acme Corp (2022-2023)");
    }
}

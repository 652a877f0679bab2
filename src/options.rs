use std::collections::BTreeSet;
use std::str::FromStr;

/// Header of the vehicle-plate column in the crossing reports.
pub const DEFAULT_PLATE_HEADER: &str = "Araç Plaka";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityMode {
    BestEffort,
    Strict,
    SkipAmbiguous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSelection {
    pages: BTreeSet<u32>,
}

impl PageSelection {
    #[must_use]
    pub fn contains(&self, page: u32) -> bool {
        self.pages.contains(&page)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl FromStr for PageSelection {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut pages = BTreeSet::new();
        for token in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some((start, end)) = token.split_once('-') {
                let start: u32 = start
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid page range start: '{start}'"))?;
                let end: u32 = end
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid page range end: '{end}'"))?;
                if start == 0 || end == 0 {
                    return Err("pages are 1-based".to_string());
                }
                if end < start {
                    return Err(format!(
                        "invalid range '{token}': end is smaller than start"
                    ));
                }
                pages.extend(start..=end);
            } else {
                let page: u32 = token
                    .parse()
                    .map_err(|_| format!("invalid page number: '{token}'"))?;
                if page == 0 {
                    return Err("pages are 1-based".to_string());
                }
                pages.insert(page);
            }
        }

        if pages.is_empty() {
            return Err("page selection cannot be empty".to_string());
        }

        Ok(Self { pages })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub pages: Option<PageSelection>,
    pub quality_mode: QualityMode,
    pub min_cols: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            pages: None,
            quality_mode: QualityMode::BestEffort,
            min_cols: 2,
        }
    }
}

/// Headers the normalizer requires from every extracted table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub plate_header: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            plate_header: DEFAULT_PLATE_HEADER.to_string(),
        }
    }
}

/// How values are stored in the template cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StyleMode {
    /// Numbers as numbers, text as text, template styles untouched.
    #[default]
    PreserveType,
    /// Every value as a text cell carrying the `@` number format.
    ForceText,
}

impl FromStr for StyleMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "preserve" | "preserve-type" => Ok(Self::PreserveType),
            "text" | "force-text" => Ok(Self::ForceText),
            other => Err(format!(
                "invalid style mode '{other}', expected preserve or text"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscribeOptions {
    pub sheet_index: usize,
    /// First data row, 0-based; the template's header occupies the rows above.
    pub start_row: u16,
    pub start_col: u16,
    pub style_mode: StyleMode,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            sheet_index: 0,
            start_row: 1,
            start_col: 0,
            style_mode: StyleMode::PreserveType,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineOptions {
    pub extract: ExtractOptions,
    pub fields: FieldMapping,
    pub transcribe: TranscribeOptions,
}

#[cfg(test)]
mod tests {
    use super::{PageSelection, StyleMode, TranscribeOptions};
    use std::str::FromStr;

    #[test]
    fn parse_page_selection_range_and_single() {
        let selection = PageSelection::from_str("1-3,5").expect("selection should parse");
        assert!(selection.contains(1));
        assert!(selection.contains(2));
        assert!(selection.contains(3));
        assert!(selection.contains(5));
        assert!(!selection.contains(4));
    }

    #[test]
    fn reject_invalid_page_selection() {
        let err = PageSelection::from_str("3-1").expect_err("invalid range should fail");
        assert!(err.contains("invalid range"));
        let err = PageSelection::from_str("0").expect_err("page zero should fail");
        assert!(err.contains("1-based"));
    }

    #[test]
    fn parse_style_mode() {
        assert_eq!(StyleMode::from_str("TEXT"), Ok(StyleMode::ForceText));
        assert_eq!(StyleMode::from_str("preserve"), Ok(StyleMode::PreserveType));
        assert!(StyleMode::from_str("numeric").is_err());
    }

    #[test]
    fn default_transcription_starts_below_single_header_row() {
        let options = TranscribeOptions::default();
        assert_eq!(options.start_row, 1);
        assert_eq!(options.start_col, 0);
        assert_eq!(options.style_mode, StyleMode::PreserveType);
    }
}

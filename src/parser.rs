use crate::{errors::ConversionError, models::*, Result};
use chrono::{NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const PC_REQUIRED: [&str; 4] = ["USUBJID", "PCDTC", "PCSTRESN", "PCTPT"];
pub const EX_REQUIRED: [&str; 3] = ["USUBJID", "EXSTDTC", "EXDOSE"];
pub const DM_REQUIRED: [&str; 3] = ["USUBJID", "AGE", "SEX"];

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const MISSING_TOKENS: [&str; 3] = ["", ".", "NA"];

/// Raw SDTM domain table. Column names are stored upper-cased.
#[derive(Debug, Clone)]
pub struct SdtmDomain {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SdtmDomain {
    pub fn new(name: &str, columns: &[&str], rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.to_uppercase(),
            columns: columns.iter().map(|c| c.trim().to_uppercase()).collect(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// First column present out of a list of alternative names.
    pub fn first_column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| self.column_index(name))
    }

    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|name| self.column_index(name).is_none())
            .map(|name| name.to_string())
            .collect()
    }

    pub fn require(&self, required: &[&str]) -> Result<()> {
        let fields = self.missing_columns(required);
        if fields.is_empty() {
            Ok(())
        } else {
            Err(ConversionError::MissingField {
                domain: self.name.clone(),
                fields,
            })
        }
    }

    /// Cell text; short rows read as empty.
    pub fn value(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.trim())
            .unwrap_or("")
    }
}

pub struct SdtmParser;

impl SdtmParser {
    pub fn read_domain<P: AsRef<Path>>(name: &str, file_path: P) -> Result<SdtmDomain> {
        let file = File::open(file_path)?;
        Self::read_domain_from_reader(name, file)
    }

    pub fn read_domain_from_reader<R: Read>(name: &str, source: R) -> Result<SdtmDomain> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let header_refs: Vec<&str> = headers.iter().map(|h| h.as_str()).collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(record.iter().map(|v| v.to_string()).collect());
        }

        let domain = SdtmDomain::new(name, &header_refs, rows);
        log::debug!(
            "Read {} domain: {} rows, {} columns",
            domain.name,
            domain.len(),
            domain.columns.len()
        );
        Ok(domain)
    }

    /// Parse an ISO 8601 `--DTC` value. Date-only values resolve to midnight.
    pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
    }

    /// Numeric cell; missing tokens and non-numeric text (BLQ markers) are `None`.
    pub fn parse_numeric(value: &str) -> Option<f64> {
        let value = value.trim();
        if MISSING_TOKENS.contains(&value) {
            return None;
        }
        value.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn parse_text(value: &str) -> Option<String> {
        let value = value.trim();
        if MISSING_TOKENS.contains(&value) {
            None
        } else {
            Some(value.to_string())
        }
    }

    pub fn concentrations(pc: &SdtmDomain) -> Result<Vec<ConcentrationRecord>> {
        pc.require(&PC_REQUIRED)?;
        let (id_col, dtc_col, conc_col, tpt_col) = (
            Self::index(pc, "USUBJID")?,
            Self::index(pc, "PCDTC")?,
            Self::index(pc, "PCSTRESN")?,
            Self::index(pc, "PCTPT")?,
        );

        (0..pc.len())
            .map(|row| -> Result<ConcentrationRecord> {
                Ok(ConcentrationRecord {
                    usubjid: Self::subject_id(pc, row, id_col)?,
                    sampled_at: Self::timestamp(pc, row, dtc_col, "PCDTC")?,
                    concentration: Self::parse_numeric(pc.value(row, conc_col)),
                    nominal_time: pc.value(row, tpt_col).to_string(),
                })
            })
            .collect()
    }

    pub fn doses(ex: &SdtmDomain) -> Result<Vec<DosingRecord>> {
        ex.require(&EX_REQUIRED)?;
        let (id_col, dtc_col, dose_col) = (
            Self::index(ex, "USUBJID")?,
            Self::index(ex, "EXSTDTC")?,
            Self::index(ex, "EXDOSE")?,
        );

        (0..ex.len())
            .map(|row| -> Result<DosingRecord> {
                let usubjid = Self::subject_id(ex, row, id_col)?;
                // Unusable amounts are kept as 0 so the validator reports them.
                let dose = Self::parse_numeric(ex.value(row, dose_col)).unwrap_or_else(|| {
                    log::warn!(
                        "EX row {}: unusable EXDOSE '{}' for subject {}",
                        row + 1,
                        ex.value(row, dose_col),
                        usubjid
                    );
                    0.0
                });
                Ok(DosingRecord {
                    dosed_at: Self::timestamp(ex, row, dtc_col, "EXSTDTC")?,
                    usubjid,
                    dose,
                })
            })
            .collect()
    }

    pub fn demographics(dm: &SdtmDomain) -> Result<Vec<Demographics>> {
        dm.require(&DM_REQUIRED)?;
        let (id_col, age_col, sex_col) = (
            Self::index(dm, "USUBJID")?,
            Self::index(dm, "AGE")?,
            Self::index(dm, "SEX")?,
        );
        let weight_col = dm.first_column(&["WEIGHT", "WT", "WTBL"]);
        let height_col = dm.first_column(&["HEIGHT", "HT", "HTBL"]);
        let race_col = dm.column_index("RACE");
        let ethnic_col = dm.column_index("ETHNIC");

        let mut seen = HashSet::new();
        let mut subjects = Vec::with_capacity(dm.len());

        for row in 0..dm.len() {
            let usubjid = Self::subject_id(dm, row, id_col)?;
            if !seen.insert(usubjid.clone()) {
                return Err(ConversionError::ParseError(format!(
                    "DM row {}: duplicate USUBJID {}",
                    row + 1,
                    usubjid
                )));
            }

            subjects.push(Demographics {
                usubjid,
                age: Self::parse_numeric(dm.value(row, age_col)),
                sex: Self::parse_text(dm.value(row, sex_col)),
                weight: weight_col.and_then(|c| Self::parse_numeric(dm.value(row, c))),
                height: height_col.and_then(|c| Self::parse_numeric(dm.value(row, c))),
                race: race_col.and_then(|c| Self::parse_text(dm.value(row, c))),
                ethnic: ethnic_col.and_then(|c| Self::parse_text(dm.value(row, c))),
            });
        }

        Ok(subjects)
    }

    fn index(domain: &SdtmDomain, column: &str) -> Result<usize> {
        domain
            .column_index(column)
            .ok_or_else(|| ConversionError::MissingField {
                domain: domain.name.clone(),
                fields: vec![column.to_string()],
            })
    }

    fn subject_id(domain: &SdtmDomain, row: usize, col: usize) -> Result<String> {
        let value = domain.value(row, col);
        if value.is_empty() {
            return Err(ConversionError::ParseError(format!(
                "{} row {}: empty USUBJID",
                domain.name,
                row + 1
            )));
        }
        Ok(value.to_string())
    }

    fn timestamp(domain: &SdtmDomain, row: usize, col: usize, column: &str) -> Result<NaiveDateTime> {
        let value = domain.value(row, col);
        Self::parse_timestamp(value).ok_or_else(|| {
            ConversionError::ParseError(format!(
                "{} row {}: invalid {} value '{}'",
                domain.name,
                row + 1,
                column,
                value
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let full = SdtmParser::parse_timestamp("2024-01-15T08:30:00").unwrap();
        let short = SdtmParser::parse_timestamp("2024-01-15T08:30").unwrap();
        assert_eq!(full, short);

        let date_only = SdtmParser::parse_timestamp("2024-01-15").unwrap();
        assert_eq!(date_only.format("%H:%M").to_string(), "00:00");

        assert!(SdtmParser::parse_timestamp("").is_none());
        assert!(SdtmParser::parse_timestamp("15/01/2024").is_none());
    }

    #[test]
    fn test_parse_numeric_sentinels() {
        assert_eq!(SdtmParser::parse_numeric("12.5"), Some(12.5));
        assert_eq!(SdtmParser::parse_numeric(" 3 "), Some(3.0));
        assert_eq!(SdtmParser::parse_numeric("."), None);
        assert_eq!(SdtmParser::parse_numeric("NA"), None);
        assert_eq!(SdtmParser::parse_numeric("<LLOQ"), None);
        assert_eq!(SdtmParser::parse_numeric(""), None);
    }

    #[test]
    fn test_read_domain_uppercases_headers() {
        let csv = "usubjid,Age,sex\nS-001,34,M\nS-002,41\n";
        let dm = SdtmParser::read_domain_from_reader("dm", csv.as_bytes()).unwrap();

        assert_eq!(dm.name, "DM");
        assert_eq!(dm.columns, vec!["USUBJID", "AGE", "SEX"]);
        assert_eq!(dm.len(), 2);
        assert_eq!(dm.value(1, 2), "");
    }

    #[test]
    fn test_missing_columns_reported() {
        let ex = SdtmDomain::new("EX", &["USUBJID", "EXDOSE"], Vec::new());
        match SdtmParser::doses(&ex) {
            Err(ConversionError::MissingField { domain, fields }) => {
                assert_eq!(domain, "EX");
                assert_eq!(fields, vec!["EXSTDTC".to_string()]);
            }
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_demographics_rejected() {
        let dm = SdtmDomain::new(
            "DM",
            &["USUBJID", "AGE", "SEX"],
            vec![
                vec!["S-001".into(), "30".into(), "M".into()],
                vec!["S-001".into(), "31".into(), "F".into()],
            ],
        );
        assert!(matches!(
            SdtmParser::demographics(&dm),
            Err(ConversionError::ParseError(_))
        ));
    }

    #[test]
    fn test_demographics_optional_covariates() {
        let dm = SdtmDomain::new(
            "DM",
            &["USUBJID", "AGE", "SEX", "WT", "RACE"],
            vec![vec!["S-001".into(), "30".into(), "F".into(), "62.5".into(), "ASIAN".into()]],
        );
        let subjects = SdtmParser::demographics(&dm).unwrap();

        assert_eq!(subjects[0].weight, Some(62.5));
        assert_eq!(subjects[0].height, None);
        assert_eq!(subjects[0].race.as_deref(), Some("ASIAN"));
        assert_eq!(subjects[0].sex_code(), Some(2));
    }
}

use crate::{errors::ConversionError, models::*, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Column order of an exported NONMEM dataset.
pub const NONMEM_COLUMNS: [&str; 16] = [
    "ID", "TIME", "AMT", "DV", "EVID", "CMT", "MDV", "AGE", "SEX", "WT", "HT", "RACE", "ETHNIC",
    "USUBJID", "PCTPT", "REC",
];

/// A single, loosely typed cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Missing,
    Number(f64),
    Text(String),
}

impl Value {
    /// Classify raw cell text; `missing_value` and the usual blanks read as `Missing`.
    pub fn parse(cell: &str, missing_value: &str) -> Self {
        let cell = cell.trim();
        if cell.is_empty() || cell == missing_value || cell == "." || cell == "NA" {
            return Value::Missing;
        }
        match cell.parse::<f64>() {
            Ok(v) if v.is_finite() => Value::Number(v),
            _ => Value::Text(cell.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn render(&self, missing_value: &str) -> String {
        match self {
            Value::Missing => missing_value.to_string(),
            Value::Number(v) => v.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// Grouping key that works for numeric and text identifiers alike.
    pub fn key(&self) -> String {
        self.render("")
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Value::Missing, Value::Number)
    }
}

impl From<Option<String>> for Value {
    fn from(value: Option<String>) -> Self {
        value.map_or(Value::Missing, Value::Text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: &str, values: Vec<Value>) -> Self {
        Self {
            name: name.to_uppercase(),
            values,
        }
    }

    pub fn numeric(name: &str, values: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self::new(name, values.into_iter().map(Value::from).collect())
    }

    /// True when every present cell holds a number.
    pub fn is_numeric(&self) -> bool {
        self.values
            .iter()
            .all(|v| matches!(v, Value::Missing | Value::Number(_)))
    }
}

/// Rectangular table of named columns, as handed to the validator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Dataset {
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let n_rows = columns.first().map_or(0, |c| c.values.len());
        if let Some(bad) = columns.iter().find(|c| c.values.len() != n_rows) {
            return Err(ConversionError::InvalidInput(format!(
                "column {} has {} rows, expected {}",
                bad.name,
                bad.values.len(),
                n_rows
            )));
        }
        Ok(Self { columns, n_rows })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Numeric view of a column; non-numeric cells read as `None`.
    pub fn numeric(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.column(name)
            .map(|c| c.values.iter().map(Value::as_f64).collect())
    }

    pub fn without_column(mut self, name: &str) -> Self {
        self.columns.retain(|c| !c.name.eq_ignore_ascii_case(name));
        self
    }

    pub fn set_value(&mut self, name: &str, row: usize, value: Value) -> Result<()> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConversionError::InvalidInput(format!("no column named {}", name)))?;
        let cell = column.values.get_mut(row).ok_or_else(|| {
            ConversionError::InvalidInput(format!("row {} out of range for {}", row, name))
        })?;
        *cell = value;
        Ok(())
    }

    pub fn from_nonmem(dataset: &NonmemDataset) -> Self {
        let records = &dataset.records;
        let number = |f: fn(&NonmemRecord) -> f64| -> Vec<Value> {
            records.iter().map(|r| Value::Number(f(r))).collect()
        };
        let optional = |f: fn(&NonmemRecord) -> Option<f64>| -> Vec<Value> {
            records.iter().map(|r| Value::from(f(r))).collect()
        };
        let text = |f: fn(&NonmemRecord) -> Option<String>| -> Vec<Value> {
            records.iter().map(|r| Value::from(f(r))).collect()
        };

        let columns = vec![
            Column::new("ID", number(|r| r.id as f64)),
            Column::new("TIME", number(|r| r.time)),
            Column::new("AMT", number(|r| r.amt)),
            Column::new("DV", optional(|r| r.dv)),
            Column::new("EVID", number(|r| r.evid as f64)),
            Column::new("CMT", number(|r| r.cmt as f64)),
            Column::new("MDV", number(|r| r.mdv as f64)),
            Column::new("AGE", optional(|r| r.age)),
            Column::new("SEX", optional(|r| r.sex.map(f64::from))),
            Column::new("WT", optional(|r| r.weight)),
            Column::new("HT", optional(|r| r.height)),
            Column::new("RACE", text(|r| r.race.clone())),
            Column::new("ETHNIC", text(|r| r.ethnic.clone())),
            Column::new("USUBJID", text(|r| Some(r.usubjid.clone()))),
            Column::new("PCTPT", text(|r| r.nominal_time.clone())),
            Column::new("REC", number(|r| r.rec as f64)),
        ];

        Self {
            columns,
            n_rows: records.len(),
        }
    }

    /// Rebuild typed records from a NONMEM table.
    ///
    /// ID must be a non-negative integer and EVID, CMT and MDV small
    /// non-negative integers; anything else is rejected with the offending row.
    /// MDV is read from the file when present and derived from DV otherwise.
    pub fn to_nonmem(&self, study_id: &str) -> Result<NonmemDataset> {
        let required = |name: &str| {
            self.numeric(name)
                .ok_or_else(|| ConversionError::InvalidInput(format!("column {} missing", name)))
        };
        let optional = |name: &str| self.numeric(name).unwrap_or_else(|| vec![None; self.n_rows]);
        let text = |name: &str, row: usize| match self.column(name).map(|c| &c.values[row]) {
            Some(Value::Missing) | None => None,
            Some(value) => Some(value.key()),
        };

        let (ids, times, amts, dvs, evids, cmts) = (
            required("ID")?,
            required("TIME")?,
            required("AMT")?,
            required("DV")?,
            required("EVID")?,
            required("CMT")?,
        );
        let mdvs = optional("MDV");
        let (ages, sexes, weights, heights, recs) = (
            optional("AGE"),
            optional("SEX"),
            optional("WT"),
            optional("HT"),
            optional("REC"),
        );

        let mut records = Vec::with_capacity(self.n_rows);
        for row in 0..self.n_rows {
            let id = Self::integer(ids[row], "ID", row, u32::MAX as f64)? as u32;
            let time = times[row]
                .ok_or_else(|| ConversionError::InvalidInput(format!("row {}: missing TIME", row + 1)))?;
            let mdv = match mdvs[row] {
                Some(_) => Self::integer(mdvs[row], "MDV", row, u8::MAX as f64)? as u8,
                None => u8::from(dvs[row].is_none()),
            };
            let sex = match sexes[row] {
                Some(_) => Some(Self::integer(sexes[row], "SEX", row, u8::MAX as f64)? as u8),
                None => None,
            };

            records.push(NonmemRecord {
                id,
                usubjid: text("USUBJID", row).unwrap_or_else(|| id.to_string()),
                time,
                amt: amts[row].unwrap_or(0.0),
                dv: dvs[row],
                evid: Self::integer(evids[row], "EVID", row, u8::MAX as f64)? as u8,
                cmt: Self::integer(cmts[row], "CMT", row, u8::MAX as f64)? as u8,
                mdv,
                age: ages[row],
                sex,
                weight: weights[row],
                height: heights[row],
                race: text("RACE", row),
                ethnic: text("ETHNIC", row),
                nominal_time: text("PCTPT", row),
                rec: recs[row].map_or(row + 1, |r| r as usize),
            });
        }

        Ok(NonmemDataset {
            study_id: study_id.to_string(),
            records,
        })
    }

    fn integer(value: Option<f64>, name: &str, row: usize, max: f64) -> Result<f64> {
        let value = value
            .ok_or_else(|| ConversionError::InvalidInput(format!("row {}: missing {}", row + 1, name)))?;
        if value.fract() != 0.0 || value < 0.0 || value > max {
            return Err(ConversionError::InvalidInput(format!(
                "row {}: {} must be a non-negative integer, found {}",
                row + 1,
                name,
                value
            )));
        }
        Ok(value)
    }

    pub fn read_csv<P: AsRef<Path>>(file_path: P, missing_value: &str) -> Result<Self> {
        let file = File::open(file_path)?;
        Self::from_reader(file, missing_value)
    }

    pub fn from_reader<R: Read>(source: R, missing_value: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let mut columns: Vec<Column> = reader
            .headers()?
            .iter()
            .map(|h| Column::new(h.trim(), Vec::new()))
            .collect();

        for result in reader.records() {
            let record = result?;
            for (i, column) in columns.iter_mut().enumerate() {
                let cell = record.get(i).unwrap_or("");
                column.values.push(Value::parse(cell, missing_value));
            }
        }

        Self::from_columns(columns)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, file_path: P, missing_value: &str) -> Result<()> {
        let file = File::create(file_path)?;
        self.to_writer(file, missing_value)
    }

    pub fn to_writer<W: Write>(&self, sink: W, missing_value: &str) -> Result<()> {
        let mut writer = WriterBuilder::new().from_writer(sink);
        writer.write_record(self.columns.iter().map(|c| c.name.as_str()))?;

        for row in 0..self.n_rows {
            writer.write_record(
                self.columns
                    .iter()
                    .map(|c| c.values[row].render(missing_value)),
            )?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_parse() {
        assert_eq!(Value::parse("1.5", "."), Value::Number(1.5));
        assert_eq!(Value::parse(".", "."), Value::Missing);
        assert_eq!(Value::parse("-99", "-99"), Value::Missing);
        assert_eq!(Value::parse("", "."), Value::Missing);
        assert_eq!(Value::parse("S-01", "."), Value::Text("S-01".to_string()));
    }

    #[test]
    fn test_csv_round_trip_with_sentinel() {
        let csv = "ID,TIME,DV\n1,0,.\n1,1.5,12.25\n";
        let dataset = Dataset::from_reader(csv.as_bytes(), ".").unwrap();
        assert_eq!(dataset.n_rows(), 2);
        assert_eq!(dataset.numeric("DV").unwrap(), vec![None, Some(12.25)]);

        let mut out = Vec::new();
        dataset.to_writer(&mut out, "-99").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "ID,TIME,DV\n1,0,-99\n1,1.5,12.25\n");
    }

    #[test]
    fn test_mismatched_columns_rejected() {
        let columns = vec![
            Column::numeric("ID", vec![Some(1.0), Some(2.0)]),
            Column::numeric("TIME", vec![Some(0.0)]),
        ];
        assert!(Dataset::from_columns(columns).is_err());
    }

    #[test]
    fn test_numeric_column_detection() {
        let text = Column::new("ID", vec![Value::Text("A".into()), Value::Number(1.0)]);
        let numeric = Column::new("ID", vec![Value::Missing, Value::Number(1.0)]);
        assert!(!text.is_numeric());
        assert!(numeric.is_numeric());
    }

    #[test]
    fn test_to_nonmem_keeps_file_mdv() {
        let csv = "ID,TIME,AMT,DV,EVID,CMT,MDV\n1,0,100,.,1,1,1\n1,1,0,12,0,2,1\n2,0,50,.,1,1,1\n";
        let table = Dataset::from_reader(csv.as_bytes(), ".").unwrap();
        let dataset = table.to_nonmem("TEST").unwrap();

        assert_eq!(dataset.subject_ids(), vec![1, 2]);
        assert_eq!(dataset.records[1].dv, Some(12.0));
        assert_eq!(dataset.records[1].mdv, 1);
        assert_eq!(dataset.records[2].rec, 3);
        assert_eq!(dataset.records[2].usubjid, "2");
    }

    #[test]
    fn test_to_nonmem_rejects_fractional_and_negative_ids() {
        for id in ["1.5", "-1"] {
            let csv = format!("ID,TIME,AMT,DV,EVID,CMT\n1,0,100,.,1,1\n{},1,0,12,0,2\n", id);
            let table = Dataset::from_reader(csv.as_bytes(), ".").unwrap();
            let err = table.to_nonmem("TEST").unwrap_err();
            assert!(matches!(err, ConversionError::InvalidInput(_)));
            assert!(err.to_string().contains("row 2: ID"), "{}", err);
        }
    }

    #[test]
    fn test_without_column_and_set_value() {
        let columns = vec![
            Column::numeric("ID", vec![Some(1.0)]),
            Column::numeric("EVID", vec![Some(1.0)]),
        ];
        let mut dataset = Dataset::from_columns(columns).unwrap();
        dataset.set_value("evid", 0, Value::Number(0.0)).unwrap();
        assert_eq!(dataset.numeric("EVID").unwrap(), vec![Some(0.0)]);

        let dataset = dataset.without_column("EVID");
        assert_eq!(dataset.column_names(), vec!["ID"]);
    }
}

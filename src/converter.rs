use crate::{errors::ConversionError, models::*, parser::{SdtmDomain, SdtmParser}, Result};
use chrono::NaiveDateTime;
use std::collections::HashMap;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Dose or observation event before re-keying and time derivation.
struct SourceEvent<'a> {
    usubjid: &'a str,
    at: NaiveDateTime,
    kind: EventType,
    amt: f64,
    dv: Option<f64>,
    nominal_time: Option<&'a str>,
}

pub struct SdtmConverter;

impl SdtmConverter {
    /// Convert PC, EX and DM domains into a sorted NONMEM event dataset.
    pub fn convert(
        pc: &SdtmDomain,
        ex: &SdtmDomain,
        dm: &SdtmDomain,
        study_id: &str,
    ) -> Result<NonmemDataset> {
        let concentrations = SdtmParser::concentrations(pc)?;
        let doses = SdtmParser::doses(ex)?;
        let demographics = SdtmParser::demographics(dm)?;

        Self::convert_records(&concentrations, &doses, &demographics, study_id)
    }

    pub fn convert_records(
        concentrations: &[ConcentrationRecord],
        doses: &[DosingRecord],
        demographics: &[Demographics],
        study_id: &str,
    ) -> Result<NonmemDataset> {
        log::info!(
            "Converting study {}: {} dosing records, {} concentration records, {} subjects in DM",
            study_id,
            doses.len(),
            concentrations.len(),
            demographics.len()
        );

        let events = Self::build_events(concentrations, doses);
        let origins = Self::dose_origins(doses);
        let subject_ids = Self::assign_subject_ids(&events);

        let demographics_by_subject: HashMap<&str, &Demographics> = demographics
            .iter()
            .map(|d| (d.usubjid.as_str(), d))
            .collect();

        let mut records = Vec::with_capacity(events.len());
        let mut warned_missing_dm = std::collections::HashSet::new();

        for event in &events {
            let origin = origins.get(event.usubjid).ok_or_else(|| {
                ConversionError::NoDosingRecords {
                    subject: event.usubjid.to_string(),
                }
            })?;

            let demo = demographics_by_subject.get(event.usubjid).copied();
            if demo.is_none() && warned_missing_dm.insert(event.usubjid) {
                log::warn!(
                    "Subject {} not found in DM; covariates will be missing",
                    event.usubjid
                );
            }

            let time = (event.at - *origin).num_milliseconds() as f64 / MILLIS_PER_HOUR;

            records.push(NonmemRecord {
                id: subject_ids[event.usubjid],
                usubjid: event.usubjid.to_string(),
                time,
                amt: event.amt,
                dv: event.dv,
                evid: event.kind.evid(),
                cmt: event.kind.compartment(),
                mdv: u8::from(event.dv.is_none()),
                age: demo.and_then(|d| d.age),
                sex: demo.and_then(|d| d.sex_code()),
                weight: demo.and_then(|d| d.weight),
                height: demo.and_then(|d| d.height),
                race: demo.and_then(|d| d.race.clone()),
                ethnic: demo.and_then(|d| d.ethnic.clone()),
                nominal_time: event.nominal_time.map(str::to_string),
                rec: 0,
            });
        }

        Self::sort_records(&mut records);

        log::info!(
            "Converted {} records for {} subjects",
            records.len(),
            subject_ids.len()
        );

        Ok(NonmemDataset {
            study_id: study_id.to_string(),
            records,
        })
    }

    /// Dose rows first, then observation rows, each in source order.
    fn build_events<'a>(
        concentrations: &'a [ConcentrationRecord],
        doses: &'a [DosingRecord],
    ) -> Vec<SourceEvent<'a>> {
        let dose_events = doses.iter().map(|d| SourceEvent {
            usubjid: &d.usubjid,
            at: d.dosed_at,
            kind: EventType::Dose,
            amt: d.dose,
            dv: None,
            nominal_time: None,
        });

        let observation_events = concentrations.iter().map(|c| SourceEvent {
            usubjid: &c.usubjid,
            at: c.sampled_at,
            kind: EventType::Observation,
            amt: 0.0,
            dv: c.concentration,
            nominal_time: Some(c.nominal_time.as_str()),
        });

        dose_events.chain(observation_events).collect()
    }

    /// Earliest dose instant per subject.
    fn dose_origins(doses: &[DosingRecord]) -> HashMap<&str, NaiveDateTime> {
        let mut origins: HashMap<&str, NaiveDateTime> = HashMap::new();
        for dose in doses {
            origins
                .entry(dose.usubjid.as_str())
                .and_modify(|t| *t = (*t).min(dose.dosed_at))
                .or_insert(dose.dosed_at);
        }
        origins
    }

    /// 1-based integer IDs in order of first appearance.
    fn assign_subject_ids<'a>(events: &[SourceEvent<'a>]) -> HashMap<&'a str, u32> {
        let mut ids: HashMap<&str, u32> = HashMap::new();
        for event in events {
            let next = ids.len() as u32 + 1;
            ids.entry(event.usubjid).or_insert(next);
        }
        ids
    }

    /// Order by ID, TIME, then dose before observation; number rows from 1.
    fn sort_records(records: &mut [NonmemRecord]) {
        records.sort_by(|a, b| {
            a.id.cmp(&b.id)
                .then(a.time.total_cmp(&b.time))
                .then(b.evid.cmp(&a.evid))
        });
        for (i, record) in records.iter_mut().enumerate() {
            record.rec = i + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(name: &str, columns: &[&str], rows: &[&[&str]]) -> SdtmDomain {
        SdtmDomain::new(
            name,
            columns,
            rows.iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    fn sample_domains() -> (SdtmDomain, SdtmDomain, SdtmDomain) {
        let pc = domain(
            "PC",
            &["USUBJID", "PCDTC", "PCSTRESN", "PCTPT"],
            &[
                &["S-002", "2024-01-02T08:00:00", "", "PREDOSE"],
                &["S-002", "2024-01-02T09:00:00", "12.5", "1H"],
                &["S-001", "2024-01-01T08:00:00", "0", "PREDOSE"],
                &["S-001", "2024-01-01T10:30:00", "8.1", "2.5H"],
                &["S-001", "2024-01-01T09:00:00", "<LLOQ", "1H"],
            ],
        );
        let ex = domain(
            "EX",
            &["USUBJID", "EXSTDTC", "EXDOSE"],
            &[
                &["S-001", "2024-01-01T08:00:00", "100"],
                &["S-002", "2024-01-02T08:00:00", "200"],
            ],
        );
        let dm = domain(
            "DM",
            &["USUBJID", "AGE", "SEX", "WEIGHT"],
            &[&["S-001", "34", "M", "70"], &["S-002", "51", "F", "64.5"]],
        );
        (pc, ex, dm)
    }

    #[test]
    fn test_convert_row_counts_and_flags() {
        let (pc, ex, dm) = sample_domains();
        let dataset = SdtmConverter::convert(&pc, &ex, &dm, "STUDY01").unwrap();

        assert_eq!(dataset.study_id, "STUDY01");
        assert_eq!(dataset.records.len(), pc.len() + ex.len());
        assert_eq!(dataset.dose_count(), 2);
        assert_eq!(dataset.observation_count(), 5);

        for record in &dataset.records {
            assert_eq!(record.mdv == 1, record.dv.is_none());
            if record.is_dose() {
                assert_eq!(record.cmt, 1);
                assert_eq!(record.time, 0.0);
            } else {
                assert_eq!(record.cmt, 2);
                assert_eq!(record.amt, 0.0);
            }
        }
    }

    #[test]
    fn test_convert_ordering_and_ids() {
        let (pc, ex, dm) = sample_domains();
        let dataset = SdtmConverter::convert(&pc, &ex, &dm, "STUDY01").unwrap();

        // Dose rows come first in the concatenation, so EX order decides IDs.
        let first = &dataset.records[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.usubjid, "S-001");
        assert!(first.is_dose());

        // Predose sample at the dose instant sorts after the dose.
        let second = &dataset.records[1];
        assert_eq!(second.id, 1);
        assert_eq!(second.time, 0.0);
        assert!(second.is_observation());

        let times: Vec<f64> = dataset
            .records
            .iter()
            .filter(|r| r.id == 1)
            .map(|r| r.time)
            .collect();
        assert_eq!(times, vec![0.0, 0.0, 1.0, 2.5]);

        let recs: Vec<usize> = dataset.records.iter().map(|r| r.rec).collect();
        assert_eq!(recs, (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn test_convert_covariates() {
        let (pc, ex, dm) = sample_domains();
        let dataset = SdtmConverter::convert(&pc, &ex, &dm, "STUDY01").unwrap();

        let subject_one = dataset.records.iter().find(|r| r.id == 1).unwrap();
        assert_eq!(subject_one.sex, Some(1));
        assert_eq!(subject_one.age, Some(34.0));
        assert_eq!(subject_one.weight, Some(70.0));

        let subject_two = dataset.records.iter().find(|r| r.id == 2).unwrap();
        assert_eq!(subject_two.sex, Some(2));
        assert_eq!(subject_two.height, None);
    }

    #[test]
    fn test_subject_missing_from_demographics_keeps_rows() {
        let (pc, ex, _) = sample_domains();
        let dm = domain("DM", &["USUBJID", "AGE", "SEX"], &[&["S-001", "34", "M"]]);
        let dataset = SdtmConverter::convert(&pc, &ex, &dm, "STUDY01").unwrap();

        let orphan: Vec<&NonmemRecord> =
            dataset.records.iter().filter(|r| r.usubjid == "S-002").collect();
        assert_eq!(orphan.len(), 3);
        assert!(orphan.iter().all(|r| r.age.is_none() && r.sex.is_none()));
    }

    #[test]
    fn test_subject_without_dose_is_error() {
        let (pc, _, dm) = sample_domains();
        let ex = domain(
            "EX",
            &["USUBJID", "EXSTDTC", "EXDOSE"],
            &[&["S-001", "2024-01-01T08:00:00", "100"]],
        );

        match SdtmConverter::convert(&pc, &ex, &dm, "STUDY01") {
            Err(ConversionError::NoDosingRecords { subject }) => assert_eq!(subject, "S-002"),
            other => panic!("expected NoDosingRecords, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_columns_name_domain() {
        let (_, ex, dm) = sample_domains();
        let pc = domain("PC", &["USUBJID", "PCDTC", "PCSTRESN"], &[]);

        match SdtmConverter::convert(&pc, &ex, &dm, "STUDY01") {
            Err(ConversionError::MissingField { domain, fields }) => {
                assert_eq!(domain, "PC");
                assert_eq!(fields, vec!["PCTPT".to_string()]);
            }
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_sample_before_dose_has_negative_time() {
        let (_, ex, dm) = sample_domains();
        let pc = domain(
            "PC",
            &["USUBJID", "PCDTC", "PCSTRESN", "PCTPT"],
            &[&["S-001", "2024-01-01T07:30:00", "", "PREDOSE"]],
        );
        let dataset = SdtmConverter::convert(&pc, &ex, &dm, "STUDY01").unwrap();

        let predose = dataset.records.iter().find(|r| r.is_observation()).unwrap();
        assert_eq!(predose.time, -0.5);
        assert_eq!(predose.rec, 1);
    }

    #[test]
    fn test_earliest_dose_is_origin() {
        let pc = domain(
            "PC",
            &["USUBJID", "PCDTC", "PCSTRESN", "PCTPT"],
            &[&["S-001", "2024-01-02T10:00:00", "4.0", "26H"]],
        );
        let ex = domain(
            "EX",
            &["USUBJID", "EXSTDTC", "EXDOSE"],
            &[
                &["S-001", "2024-01-02T08:00:00", "50"],
                &["S-001", "2024-01-01T08:00:00", "50"],
            ],
        );
        let dm = domain("DM", &["USUBJID", "AGE", "SEX"], &[&["S-001", "40", "F"]]);
        let dataset = SdtmConverter::convert(&pc, &ex, &dm, "STUDY01").unwrap();

        let times: Vec<f64> = dataset.records.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![0.0, 24.0, 26.0]);
    }
}

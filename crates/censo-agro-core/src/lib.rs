use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CensoError {
    #[error("category not found: {0}")]
    CategoryNotFound(String),
    #[error("no valid municipality records in dataset")]
    EmptyDataset,
}

/// Name fragments that mark a row as a regional/aggregate rollup rather
/// than a municipality. Matched against the lowercased name.
pub const EXCLUDED_NAME_KEYWORDS: [&str; 23] = [
    "região",
    "mesorregião",
    "microrregião",
    "nordeste",
    "norte",
    "sul",
    "centro",
    "oeste",
    "leste",
    "sudeste",
    "noroeste",
    "sudoeste",
    "alto ",
    "baixo ",
    "médio ",
    "-grossense",
    "parecis",
    "araguaia",
    "pantanal",
    "cerrado",
    "amazônia",
    "caatinga",
    "mata atlântica",
];

/// Known aggregate rows present in the crop dataset under plain names.
/// Only the crop profile applies this list; the other kinds rely on the
/// keyword rules alone.
pub const CROP_NAME_DENYLIST: [&str; 7] = [
    "alto teles pires",
    "sudeste mato-grossense",
    "parecis",
    "barreiras",
    "dourados",
    "norte mato-grossense",
    "portal da amazônia",
];

pub const UNKNOWN_STATE_CODE: &str = "XX";
pub const TERRITORY_UNIT: &str = "território";
pub const TERRITORY_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Crop,
    Fertilizer,
    Agrotoxic,
    Consultancy,
    Corrective,
    Expense,
    Education,
    Revenue,
}

impl DatasetKind {
    pub const ALL: [Self; 8] = [
        Self::Crop,
        Self::Fertilizer,
        Self::Agrotoxic,
        Self::Consultancy,
        Self::Corrective,
        Self::Expense,
        Self::Education,
        Self::Revenue,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crop => "crop",
            Self::Fertilizer => "fertilizer",
            Self::Agrotoxic => "agrotoxic",
            Self::Consultancy => "consultancy",
            Self::Corrective => "corrective",
            Self::Expense => "expense",
            Self::Education => "education",
            Self::Revenue => "revenue",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "crop" => Some(Self::Crop),
            "fertilizer" => Some(Self::Fertilizer),
            "agrotoxic" => Some(Self::Agrotoxic),
            "consultancy" => Some(Self::Consultancy),
            "corrective" => Some(Self::Corrective),
            "expense" => Some(Self::Expense),
            "education" => Some(Self::Education),
            "revenue" => Some(Self::Revenue),
            _ => None,
        }
    }

    /// Static JSON file the kind is loaded from, relative to the data directory.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Crop => "crop_data_static.json",
            Self::Fertilizer => "fertilizer_data_static_corrigido.json",
            Self::Agrotoxic => "agrotoxico_data_static.json",
            Self::Consultancy => "consultoria_tecnica_data_static.json",
            Self::Corrective => "corretivos_data_static.json",
            Self::Expense => "despesa_data_static.json",
            Self::Education => "escolaridade_data_static.json",
            Self::Revenue => "receita_data_static.json",
        }
    }

    /// The crop files carry `harvested_area`; every other kind carries `value`.
    #[must_use]
    pub fn uses_harvested_area(self) -> bool {
        self == Self::Crop
    }

    #[must_use]
    pub fn default_unit(self) -> &'static str {
        match self {
            Self::Expense | Self::Revenue => "R$",
            _ => "un",
        }
    }
}

impl Default for DatasetKind {
    fn default() -> Self {
        Self::Crop
    }
}

/// One raw row of a category table. Every field is optional on the wire;
/// downstream consumers apply the documented defaults (state `XX`,
/// magnitude 0, unit per kind).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MunicipalityRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvested_area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MunicipalityRecord {
    #[must_use]
    pub fn new(kind: DatasetKind, name: &str, state: &str, magnitude: f64) -> Self {
        let mut record = Self {
            municipality_name: Some(name.to_string()),
            state_code: Some(state.to_string()),
            ..Self::default()
        };
        if kind.uses_harvested_area() {
            record.harvested_area = Some(magnitude);
        } else {
            record.value = Some(magnitude);
        }
        record
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.municipality_name.as_deref()
    }

    /// Display name, `Desconhecido` when the row carries none.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.municipality_name.as_deref().unwrap_or("Desconhecido")
    }

    #[must_use]
    pub fn state(&self) -> &str {
        self.state_code.as_deref().unwrap_or(UNKNOWN_STATE_CODE)
    }

    /// Numeric magnitude of the row regardless of which wire field carried it.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.harvested_area.or(self.value).unwrap_or(0.0)
    }

    #[must_use]
    pub fn unit_or_default(&self, kind: DatasetKind) -> &str {
        self.unit.as_deref().unwrap_or_else(|| kind.default_unit())
    }
}

/// Mapping from municipality-code string to record, for one category.
pub type CategoryTable = BTreeMap<String, MunicipalityRecord>;

/// All category tables of one dataset kind, loaded once and never mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub kind: DatasetKind,
    pub tables: BTreeMap<String, CategoryTable>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryMatch<'a> {
    pub category: &'a str,
    pub table: &'a CategoryTable,
    pub fuzzy: bool,
}

impl Dataset {
    #[must_use]
    pub fn new(kind: DatasetKind, tables: BTreeMap<String, CategoryTable>) -> Self {
        Self { kind, tables }
    }

    #[must_use]
    pub fn category_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Exact category lookup, falling back to the substring matcher.
    ///
    /// # Errors
    /// Returns [`CensoError::CategoryNotFound`] when neither an exact nor a
    /// fuzzy match exists.
    pub fn lookup(&self, category: &str) -> Result<CategoryMatch<'_>, CensoError> {
        if let Some((name, table)) = self.tables.get_key_value(category) {
            return Ok(CategoryMatch { category: name, table, fuzzy: false });
        }

        let candidates = find_similar(category, self.tables.keys().map(String::as_str));
        let Some(best) = candidates.first() else {
            return Err(CensoError::CategoryNotFound(category.to_string()));
        };
        let Some((name, table)) = self.tables.get_key_value(best) else {
            return Err(CensoError::CategoryNotFound(category.to_string()));
        };
        Ok(CategoryMatch { category: name, table, fuzzy: true })
    }
}

/// Substring matcher for category names: a candidate matches when the
/// lowercased query contains it or is contained by it. Candidates come back
/// in the iteration order of `available`, so callers pass a sorted source to
/// keep "best match = first result" reproducible.
#[must_use]
pub fn find_similar<'a, I>(name: &str, available: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let query = name.to_lowercase();
    available
        .into_iter()
        .filter(|candidate| {
            let candidate_lower = candidate.to_lowercase();
            candidate_lower.contains(&query) || query.contains(&candidate_lower)
        })
        .map(ToString::to_string)
        .collect()
}

/// The single source of truth for deciding whether a (code, record) pair is a
/// genuine municipality. Every consumer of a category table goes through
/// this predicate before aggregating, ranking, comparing, or exporting.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MunicipalityValidator {
    apply_crop_denylist: bool,
}

impl MunicipalityValidator {
    #[must_use]
    pub fn for_kind(kind: DatasetKind) -> Self {
        Self { apply_crop_denylist: kind == DatasetKind::Crop }
    }

    /// True when the pair passes every rule: 7 ASCII digits, leading digit
    /// 1-5, non-empty name, no aggregate keyword in the lowercased name,
    /// and (crop profile only) the name is not on the literal denylist.
    /// Total over records with missing optional fields.
    #[must_use]
    pub fn is_valid_municipality(&self, code: &str, record: &MunicipalityRecord) -> bool {
        if code.len() != 7 || !code.bytes().all(|byte| byte.is_ascii_digit()) {
            return false;
        }
        if !matches!(code.as_bytes()[0], b'1'..=b'5') {
            return false;
        }

        let Some(name) = record.name() else {
            return false;
        };
        if name.is_empty() {
            return false;
        }

        let name_lower = name.to_lowercase();
        if EXCLUDED_NAME_KEYWORDS.iter().any(|keyword| name_lower.contains(keyword)) {
            return false;
        }
        if self.apply_crop_denylist && CROP_NAME_DENYLIST.contains(&name_lower.as_str()) {
            return false;
        }

        true
    }

    /// Clean copy of `table` containing only genuine municipalities, original
    /// (code, record) pairing preserved. Pure and idempotent.
    #[must_use]
    pub fn filter_table(&self, table: &CategoryTable) -> CategoryTable {
        table
            .iter()
            .filter(|(code, record)| self.is_valid_municipality(code, record))
            .map(|(code, record)| (code.clone(), record.clone()))
            .collect()
    }

    /// [`Self::filter_table`] with an additional exact state-code restriction
    /// applied after the validity rules.
    #[must_use]
    pub fn filter_table_in_state(
        &self,
        table: &CategoryTable,
        state: Option<&str>,
    ) -> CategoryTable {
        table
            .iter()
            .filter(|(code, record)| self.is_valid_municipality(code, record))
            .filter(|(_, record)| state.map_or(true, |wanted| record.state() == wanted))
            .map(|(code, record)| (code.clone(), record.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticalSummary {
    pub mean: f64,
    pub median: f64,
    pub mode: Option<f64>,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub q1: Option<f64>,
    pub q3: Option<f64>,
    pub total: f64,
    pub count: usize,
}

/// Central-tendency statistics over the magnitudes of a filtered table.
///
/// # Errors
/// Returns [`CensoError::EmptyDataset`] when the table has no entries.
pub fn statistical_summary(table: &CategoryTable) -> Result<StatisticalSummary, CensoError> {
    let mut values = table.values().map(MunicipalityRecord::magnitude).collect::<Vec<_>>();
    if values.is_empty() {
        return Err(CensoError::EmptyDataset);
    }
    values.sort_by(f64::total_cmp);

    let count = values.len();
    #[allow(clippy::cast_precision_loss)]
    let count_f64 = count as f64;
    let total = values.iter().sum::<f64>();
    let mean = total / count_f64;

    let median = if count % 2 == 0 {
        (values[count / 2 - 1] + values[count / 2]) / 2.0
    } else {
        values[count / 2]
    };

    let std_dev = if count > 1 {
        let sum_sq = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>();
        (sum_sq / (count_f64 - 1.0)).sqrt()
    } else {
        0.0
    };

    let (q1, q3) = if count >= 4 {
        (Some(quantile_exclusive(&values, 1)), Some(quantile_exclusive(&values, 3)))
    } else {
        (None, None)
    };

    Ok(StatisticalSummary {
        mean,
        median,
        mode: mode_of_sorted(&values),
        std_dev,
        min: values[0],
        max: values[count - 1],
        q1,
        q3,
        total,
        count,
    })
}

/// Exclusive four-group quantile cut `i` (1..=3) over ascending data with at
/// least 4 points: with m = n + 1, interpolate at j = ⌊i·m/4⌋ clamped to
/// [1, n-1] with weight δ = i·m − 4j.
fn quantile_exclusive(sorted: &[f64], i: usize) -> f64 {
    let n = sorted.len();
    let m = n + 1;
    let j = (i * m / 4).clamp(1, n - 1);
    #[allow(clippy::cast_precision_loss)]
    let delta = (i * m) as f64 - (j * 4) as f64;
    (sorted[j - 1] * (4.0 - delta) + sorted[j] * delta) / 4.0
}

/// Most frequent value, reported only when repetition exists (distinct count
/// strictly below total count). The smallest value wins a multiplicity tie.
fn mode_of_sorted(sorted: &[f64]) -> Option<f64> {
    let mut best_value = sorted[0];
    let mut best_run = 0_usize;
    let mut distinct = 0_usize;

    let mut index = 0;
    while index < sorted.len() {
        let value = sorted[index];
        let mut run = 1;
        while index + run < sorted.len() && sorted[index + run].to_bits() == value.to_bits() {
            run += 1;
        }
        if run > best_run {
            best_run = run;
            best_value = value;
        }
        distinct += 1;
        index += run;
    }

    if distinct < sorted.len() {
        Some(best_value)
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateMember {
    pub name: String,
    pub magnitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateAggregate {
    pub total: f64,
    pub count: usize,
    pub max: f64,
    pub average: f64,
    pub municipalities: Vec<StateMember>,
}

/// Per-state rollup of a filtered table. Averages are computed only after a
/// state's records are fully accumulated. Empty input yields an empty map.
#[must_use]
pub fn by_state(table: &CategoryTable) -> BTreeMap<String, StateAggregate> {
    let mut states: BTreeMap<String, StateAggregate> = BTreeMap::new();

    for record in table.values() {
        let magnitude = record.magnitude();
        let entry = states.entry(record.state().to_string()).or_insert(StateAggregate {
            total: 0.0,
            count: 0,
            max: 0.0,
            average: 0.0,
            municipalities: Vec::new(),
        });
        entry.total += magnitude;
        entry.count += 1;
        entry.max = entry.max.max(magnitude);
        entry
            .municipalities
            .push(StateMember { name: record.display_name().to_string(), magnitude });
    }

    for aggregate in states.values_mut() {
        #[allow(clippy::cast_precision_loss)]
        let count = aggregate.count as f64;
        aggregate.average = aggregate.total / count;
    }

    states
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedMunicipality {
    pub code: String,
    pub name: String,
    pub state: String,
    pub magnitude: f64,
}

/// Top `n` records of a filtered table by descending magnitude, ties broken
/// by ascending code. Empty input yields an empty result.
#[must_use]
pub fn top_n(table: &CategoryTable, n: usize) -> Vec<RankedMunicipality> {
    let mut ranked = table
        .iter()
        .map(|(code, record)| RankedMunicipality {
            code: code.clone(),
            name: record.display_name().to_string(),
            state: record.state().to_string(),
            magnitude: record.magnitude(),
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|lhs, rhs| {
        rhs.magnitude.total_cmp(&lhs.magnitude).then_with(|| lhs.code.cmp(&rhs.code))
    });
    ranked.truncate(n);
    ranked
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonEntry {
    pub code: String,
    pub name: String,
    pub state: String,
    pub value_a: f64,
    pub value_b: f64,
    pub ratio: f64,
}

/// Code-level intersection of two filtered tables, ordered by code. The
/// ratio denominator is floored at 1 so a zero-magnitude counterpart never
/// divides by zero.
#[must_use]
pub fn compare(table_a: &CategoryTable, table_b: &CategoryTable) -> Vec<ComparisonEntry> {
    table_a
        .iter()
        .filter_map(|(code, record_a)| {
            let record_b = table_b.get(code)?;
            let value_a = record_a.magnitude();
            let value_b = record_b.magnitude();
            Some(ComparisonEntry {
                code: code.clone(),
                name: record_a.display_name().to_string(),
                state: record_a.state().to_string(),
                value_a,
                value_b,
                ratio: value_a / value_b.max(1.0),
            })
        })
        .collect()
}

/// Resolve a reseller's municipality codes against the crop dataset's raw
/// tables. Total over its input: codes found in no category come back as a
/// synthetic `Município {code}` placeholder with the unknown state marker.
/// Every entry carries the fixed territory weight; this view answers which
/// municipalities belong to the territory, not how much they produce.
#[must_use]
pub fn resolve_territory(codes: &[String], crops: &Dataset) -> BTreeMap<String, MunicipalityRecord> {
    let mut territory = BTreeMap::new();

    for code in codes {
        let found = crops.tables.values().find_map(|table| table.get(code));
        let (name, state) = match found {
            Some(record) => (
                record.municipality_name.clone().unwrap_or_else(|| format!("Município {code}")),
                record.state().to_string(),
            ),
            None => (format!("Município {code}"), UNKNOWN_STATE_CODE.to_string()),
        };

        territory.insert(
            code.clone(),
            MunicipalityRecord {
                municipality_name: Some(name),
                state_code: Some(state),
                harvested_area: Some(TERRITORY_WEIGHT),
                value: None,
                unit: Some(TERRITORY_UNIT.to_string()),
            },
        );
    }

    territory
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct StateInfo {
    pub code: &'static str,
    pub name: &'static str,
}

/// The 27 Brazilian federative units.
pub const BRAZILIAN_STATES: [StateInfo; 27] = [
    StateInfo { code: "AC", name: "Acre" },
    StateInfo { code: "AL", name: "Alagoas" },
    StateInfo { code: "AP", name: "Amapá" },
    StateInfo { code: "AM", name: "Amazonas" },
    StateInfo { code: "BA", name: "Bahia" },
    StateInfo { code: "CE", name: "Ceará" },
    StateInfo { code: "DF", name: "Distrito Federal" },
    StateInfo { code: "ES", name: "Espírito Santo" },
    StateInfo { code: "GO", name: "Goiás" },
    StateInfo { code: "MA", name: "Maranhão" },
    StateInfo { code: "MT", name: "Mato Grosso" },
    StateInfo { code: "MS", name: "Mato Grosso do Sul" },
    StateInfo { code: "MG", name: "Minas Gerais" },
    StateInfo { code: "PA", name: "Pará" },
    StateInfo { code: "PB", name: "Paraíba" },
    StateInfo { code: "PR", name: "Paraná" },
    StateInfo { code: "PE", name: "Pernambuco" },
    StateInfo { code: "PI", name: "Piauí" },
    StateInfo { code: "RJ", name: "Rio de Janeiro" },
    StateInfo { code: "RN", name: "Rio Grande do Norte" },
    StateInfo { code: "RS", name: "Rio Grande do Sul" },
    StateInfo { code: "RO", name: "Rondônia" },
    StateInfo { code: "RR", name: "Roraima" },
    StateInfo { code: "SC", name: "Santa Catarina" },
    StateInfo { code: "SP", name: "São Paulo" },
    StateInfo { code: "SE", name: "Sergipe" },
    StateInfo { code: "TO", name: "Tocantins" },
];

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn mk_record(name: &str, state: &str, area: f64) -> MunicipalityRecord {
        MunicipalityRecord::new(DatasetKind::Crop, name, state, area)
    }

    fn mk_table(rows: &[(&str, &str, &str, f64)]) -> CategoryTable {
        rows.iter()
            .map(|(code, name, state, area)| ((*code).to_string(), mk_record(name, state, *area)))
            .collect()
    }

    fn crop_validator() -> MunicipalityValidator {
        MunicipalityValidator::for_kind(DatasetKind::Crop)
    }

    fn summary_of(values: &[f64]) -> StatisticalSummary {
        let table: CategoryTable = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                (format!("350{index:04}"), mk_record(&format!("Cidade {index}"), "SP", *value))
            })
            .collect();
        match statistical_summary(&table) {
            Ok(summary) => summary,
            Err(err) => panic!("summary should exist for non-empty table: {err}"),
        }
    }

    #[test]
    fn validator_accepts_genuine_municipality() {
        let record = mk_record("São Paulo", "SP", 100.0);
        assert!(crop_validator().is_valid_municipality("3550308", &record));
    }

    #[test]
    fn validator_rejects_wrong_length_and_non_digits() {
        let record = mk_record("Sorriso", "MT", 10.0);
        let validator = crop_validator();
        assert!(!validator.is_valid_municipality("355030", &record));
        assert!(!validator.is_valid_municipality("35503080", &record));
        assert!(!validator.is_valid_municipality("35A0308", &record));
        assert!(!validator.is_valid_municipality("", &record));
    }

    #[test]
    fn validator_rejects_invalid_leading_digit() {
        let record = mk_record("Foo", "ZZ", 1.0);
        let validator = crop_validator();
        assert!(!validator.is_valid_municipality("9999999", &record));
        assert!(!validator.is_valid_municipality("0550308", &record));
        assert!(!validator.is_valid_municipality("6550308", &record));
    }

    #[test]
    fn validator_rejects_missing_or_empty_name() {
        let validator = crop_validator();
        assert!(!validator.is_valid_municipality("3550308", &MunicipalityRecord::default()));
        assert!(!validator.is_valid_municipality("3550308", &mk_record("", "SP", 1.0)));
    }

    #[test]
    fn validator_rejects_aggregate_keywords_in_name() {
        let validator = crop_validator();
        assert!(!validator.is_valid_municipality("1200401", &mk_record("Região Norte", "XX", 5.0)));
        assert!(!validator
            .is_valid_municipality("5103403", &mk_record("Norte Mato-grossense", "MT", 5.0)));
        assert!(!validator.is_valid_municipality("5107925", &mk_record("Alto Araguaia", "MT", 5.0)));
    }

    #[test]
    fn crop_denylist_applies_to_crop_profile_only() {
        let record = mk_record("Dourados", "MS", 50.0);
        assert!(!crop_validator().is_valid_municipality("5003702", &record));
        assert!(MunicipalityValidator::for_kind(DatasetKind::Fertilizer)
            .is_valid_municipality("5003702", &record));
    }

    #[test]
    fn validator_is_total_for_records_missing_optional_fields() {
        let record = MunicipalityRecord {
            municipality_name: Some("Sorriso".to_string()),
            state_code: None,
            harvested_area: None,
            value: None,
            unit: None,
        };
        assert!(crop_validator().is_valid_municipality("5107925", &record));
    }

    #[test]
    fn filter_retains_only_genuine_municipalities() {
        let table = mk_table(&[
            ("3550308", "São Paulo", "SP", 100.0),
            ("1200401", "Região Norte", "XX", 500.0),
            ("9999999", "Foo", "ZZ", 1.0),
        ]);

        let filtered = crop_validator().filter_table(&table);
        assert_eq!(filtered.keys().collect::<Vec<_>>(), vec!["3550308"]);
        assert_eq!(filtered["3550308"], table["3550308"]);
    }

    #[test]
    fn filter_is_idempotent() {
        let table = mk_table(&[
            ("3550308", "São Paulo", "SP", 100.0),
            ("5107925", "Alto Araguaia", "MT", 20.0),
            ("5003702", "Dourados", "MS", 30.0),
        ]);

        let validator = crop_validator();
        let once = validator.filter_table(&table);
        let twice = validator.filter_table(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn filter_in_state_restricts_after_validity() {
        let table = mk_table(&[
            ("3550308", "São Paulo", "SP", 100.0),
            ("5107040", "Sorriso", "MT", 300.0),
            ("1200401", "Região Norte", "XX", 500.0),
        ]);

        let filtered = crop_validator().filter_table_in_state(&table, Some("MT"));
        assert_eq!(filtered.keys().collect::<Vec<_>>(), vec!["5107040"]);

        let unrestricted = crop_validator().filter_table_in_state(&table, None);
        assert_eq!(unrestricted.len(), 2);
    }

    #[test]
    fn summary_matches_reference_values() {
        let summary = summary_of(&[10.0, 20.0, 20.0, 40.0]);
        assert!((summary.mean - 22.5).abs() < 1e-9);
        assert!((summary.median - 20.0).abs() < 1e-9);
        assert_eq!(summary.mode, Some(20.0));
        assert!((summary.min - 10.0).abs() < 1e-9);
        assert!((summary.max - 40.0).abs() < 1e-9);
        assert_eq!(summary.q1, Some(12.5));
        assert_eq!(summary.q3, Some(35.0));
        assert!((summary.total - 90.0).abs() < 1e-9);
        assert_eq!(summary.count, 4);
        assert!((summary.std_dev - (475.0_f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn summary_mode_is_none_for_all_distinct_values() {
        let summary = summary_of(&[1.0, 2.0, 3.0]);
        assert_eq!(summary.mode, None);
        assert_eq!(summary.q1, None);
        assert_eq!(summary.q3, None);
    }

    #[test]
    fn summary_std_dev_is_zero_for_single_value() {
        let summary = summary_of(&[42.0]);
        assert!((summary.std_dev - 0.0).abs() < 1e-12);
        assert!((summary.median - 42.0).abs() < 1e-12);
    }

    #[test]
    fn summary_fails_on_empty_table() {
        assert_eq!(statistical_summary(&CategoryTable::new()), Err(CensoError::EmptyDataset));
    }

    #[test]
    fn by_state_totals_match_grand_total() {
        let table = mk_table(&[
            ("3550308", "São Paulo", "SP", 100.0),
            ("3509502", "Campinas", "SP", 40.0),
            ("5107040", "Sorriso", "MT", 300.0),
        ]);

        let states = by_state(&table);
        assert_eq!(states.len(), 2);
        let grand_total = states.values().map(|aggregate| aggregate.total).sum::<f64>();
        let direct_total = table.values().map(MunicipalityRecord::magnitude).sum::<f64>();
        assert!((grand_total - direct_total).abs() < 1e-9);

        let sp = &states["SP"];
        assert_eq!(sp.count, 2);
        assert!((sp.average - 70.0).abs() < 1e-9);
        assert!((sp.max - 100.0).abs() < 1e-9);
        assert_eq!(sp.municipalities.len(), 2);
    }

    #[test]
    fn by_state_on_empty_table_returns_empty_map() {
        assert!(by_state(&CategoryTable::new()).is_empty());
    }

    #[test]
    fn top_n_orders_by_magnitude_descending() {
        let table = mk_table(&[
            ("3550308", "São Paulo", "SP", 5.0),
            ("5107040", "Sorriso", "MT", 500.0),
            ("4106902", "Curitiba", "PR", 50.0),
        ]);

        let top = top_n(&table, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].code, "5107040");
        assert!((top[0].magnitude - 500.0).abs() < 1e-9);
        assert_eq!(top[1].code, "4106902");
    }

    #[test]
    fn top_n_breaks_ties_by_ascending_code() {
        let table = mk_table(&[
            ("5107040", "Sorriso", "MT", 10.0),
            ("3550308", "São Paulo", "SP", 10.0),
        ]);

        let top = top_n(&table, 2);
        assert_eq!(top[0].code, "3550308");
        assert_eq!(top[1].code, "5107040");
    }

    #[test]
    fn compare_intersects_codes_and_floors_denominator() {
        let table_a = mk_table(&[
            ("3550308", "São Paulo", "SP", 100.0),
            ("5107040", "Sorriso", "MT", 40.0),
            ("4106902", "Curitiba", "PR", 7.0),
        ]);
        let table_b = mk_table(&[
            ("3550308", "São Paulo", "SP", 50.0),
            ("5107040", "Sorriso", "MT", 0.0),
        ]);

        let entries = compare(&table_a, &table_b);
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].code, "3550308");
        assert!((entries[0].ratio - 2.0).abs() < 1e-9);

        // 40 / max(0, 1) keeps the intentional denominator floor.
        assert_eq!(entries[1].code, "5107040");
        assert!((entries[1].ratio - 40.0).abs() < 1e-9);
    }

    #[test]
    fn find_similar_matches_substrings_both_ways() {
        let available = ["Milho (em grão)", "Soja (em grão)", "Trigo (em grão)"];
        assert_eq!(find_similar("soja", available), vec!["Soja (em grão)"]);
        assert_eq!(find_similar("Milho (em grão) safra", available), vec!["Milho (em grão)"]);
        assert!(find_similar("café", available).is_empty());
    }

    #[test]
    fn find_similar_preserves_input_order() {
        let available = ["Arroz (em casca)", "Arroz irrigado"];
        assert_eq!(find_similar("arroz", available), vec!["Arroz (em casca)", "Arroz irrigado"]);
    }

    #[test]
    fn territory_resolution_adopts_names_from_crop_data() {
        let mut tables = BTreeMap::new();
        tables.insert("Soja (em grão)".to_string(), mk_table(&[("5107040", "Sorriso", "MT", 1.0)]));
        let crops = Dataset::new(DatasetKind::Crop, tables);

        let territory = resolve_territory(&["5107040".to_string()], &crops);
        assert_eq!(territory.len(), 1);
        let entry = &territory["5107040"];
        assert_eq!(entry.display_name(), "Sorriso");
        assert_eq!(entry.state(), "MT");
        assert!((entry.magnitude() - TERRITORY_WEIGHT).abs() < 1e-12);
        assert_eq!(entry.unit.as_deref(), Some(TERRITORY_UNIT));
    }

    #[test]
    fn territory_resolution_synthesizes_placeholder_for_unknown_code() {
        let crops = Dataset::new(DatasetKind::Crop, BTreeMap::new());
        let territory = resolve_territory(&["0000000".to_string()], &crops);

        assert_eq!(territory.len(), 1);
        let entry = &territory["0000000"];
        assert_eq!(entry.display_name(), "Município 0000000");
        assert_eq!(entry.state(), UNKNOWN_STATE_CODE);
    }

    #[test]
    fn record_serialization_keeps_original_numeric_field_name() {
        let crop = MunicipalityRecord::new(DatasetKind::Crop, "Sorriso", "MT", 12.0);
        let json = match serde_json::to_value(&crop) {
            Ok(value) => value,
            Err(err) => panic!("record should serialize: {err}"),
        };
        assert!(json.get("harvested_area").is_some());
        assert!(json.get("value").is_none());

        let expense = MunicipalityRecord::new(DatasetKind::Expense, "Sorriso", "MT", 12.0);
        let json = match serde_json::to_value(&expense) {
            Ok(value) => value,
            Err(err) => panic!("record should serialize: {err}"),
        };
        assert!(json.get("value").is_some());
        assert!(json.get("harvested_area").is_none());
    }

    #[test]
    fn dataset_lookup_prefers_exact_over_fuzzy() {
        let mut soja = CategoryTable::new();
        soja.insert(
            "5107040".to_string(),
            MunicipalityRecord::new(DatasetKind::Crop, "Sorriso", "MT", 500.0),
        );
        let mut tables = BTreeMap::new();
        tables.insert("Soja (em grão)".to_string(), soja);
        tables.insert("Soja irrigada".to_string(), CategoryTable::new());
        let dataset = Dataset::new(DatasetKind::Crop, tables);

        let exact = match dataset.lookup("Soja (em grão)") {
            Ok(matched) => matched,
            Err(err) => panic!("exact lookup should succeed: {err}"),
        };
        assert!(!exact.fuzzy);
        // Matches over float-bearing tables compare structurally.
        assert_eq!(dataset.lookup("Soja (em grão)"), Ok(exact));

        let fuzzy = match dataset.lookup("soja") {
            Ok(matched) => matched,
            Err(err) => panic!("fuzzy lookup should succeed: {err}"),
        };
        assert!(fuzzy.fuzzy);
        assert_eq!(fuzzy.category, "Soja (em grão)");

        assert_eq!(
            dataset.lookup("café"),
            Err(CensoError::CategoryNotFound("café".to_string()))
        );
    }

    #[test]
    fn state_table_covers_all_federative_units() {
        assert_eq!(BRAZILIAN_STATES.len(), 27);
        assert!(BRAZILIAN_STATES.iter().any(|state| state.code == "SP" && state.name == "São Paulo"));
        assert!(BRAZILIAN_STATES.iter().any(|state| state.code == "MT" && state.name == "Mato Grosso"));
    }

    #[test]
    fn dataset_kind_round_trips_through_strings() {
        for kind in DatasetKind::ALL {
            assert_eq!(DatasetKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DatasetKind::parse("unknown"), None);
    }

    proptest! {
        #[test]
        fn property_validator_never_panics(code in ".{0,12}", name in proptest::option::of(".{0,24}")) {
            let record = MunicipalityRecord {
                municipality_name: name,
                state_code: None,
                harvested_area: None,
                value: None,
                unit: None,
            };
            let _ = crop_validator().is_valid_municipality(&code, &record);
        }
    }

    proptest! {
        #[test]
        fn property_filter_is_idempotent(rows in proptest::collection::vec(("[0-9]{6,8}", "[a-zA-Záãç ]{1,16}", 0.0_f64..1e6), 0..32)) {
            let table: CategoryTable = rows
                .into_iter()
                .map(|(code, name, area)| (code, mk_record(&name, "SP", area)))
                .collect();
            let validator = crop_validator();
            let once = validator.filter_table(&table);
            let twice = validator.filter_table(&once);
            prop_assert_eq!(once, twice);
        }
    }

    proptest! {
        #[test]
        fn property_summary_invariants_hold(values in proptest::collection::vec(0.0_f64..1e9, 1..64)) {
            let summary = summary_of(&values);
            prop_assert!(summary.min <= summary.median);
            prop_assert!(summary.median <= summary.max);
            #[allow(clippy::cast_precision_loss)]
            let expected_total = summary.mean * summary.count as f64;
            prop_assert!((summary.total - expected_total).abs() <= 1e-6 * summary.total.abs().max(1.0));
        }
    }

    proptest! {
        #[test]
        fn property_compare_ratio_denominator_never_below_one(
            pairs in proptest::collection::vec(("3[0-9]{6}", 0.0_f64..1e6, 0.0_f64..1e6), 0..24)
        ) {
            let mut table_a = CategoryTable::new();
            let mut table_b = CategoryTable::new();
            for (code, value_a, value_b) in pairs {
                table_a.insert(code.clone(), mk_record("Cidade", "SP", value_a));
                table_b.insert(code, mk_record("Cidade", "SP", value_b));
            }
            let entries = compare(&table_a, &table_b);
            prop_assert_eq!(entries.len(), table_a.keys().filter(|code| table_b.contains_key(*code)).count());
            for entry in entries {
                prop_assert!((entry.ratio - entry.value_a / entry.value_b.max(1.0)).abs() < 1e-9);
            }
        }
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use censo_agro_core::{
    by_state, compare, resolve_territory, statistical_summary, top_n, CategoryTable, CensoError,
    Dataset, DatasetKind, MunicipalityRecord, MunicipalityValidator, RankedMunicipality,
    StateAggregate, StateInfo, StatisticalSummary, BRAZILIAN_STATES,
};
use censo_agro_store_sqlite::{NewReseller, Reseller, ResellerStore, ResellerUpdate};
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Census edition all dataset files describe.
pub const REFERENCE_YEAR: u32 = 2023;

const SEARCH_COLLECT_LIMIT: usize = 50;
const SEARCH_RETURN_LIMIT: usize = 20;
const NATIONAL_SCOPE_LABEL: &str = "Nacional (Todos os Estados)";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CensoError),
    #[error("unknown dataset kind: {0}")]
    UnknownKind(String),
    #[error("{0}")]
    Validation(String),
    #[error("cnpj already registered: {0}")]
    DuplicateCnpj(String),
    #[error("reseller not found: {0}")]
    ResellerNotFound(i64),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Parse a wire-format dataset kind, rejecting unknown names at the boundary.
///
/// # Errors
/// Returns [`ApiError::UnknownKind`] for names outside the eight kinds.
pub fn parse_kind(value: &str) -> ApiResult<DatasetKind> {
    DatasetKind::parse(value).ok_or_else(|| ApiError::UnknownKind(value.to_string()))
}

/// The eight dataset kinds, loaded once at construction and immutable
/// thereafter. A kind whose file is missing or malformed serves empty
/// tables; the process never aborts on load failure.
#[derive(Debug, Clone)]
pub struct DatasetSet {
    // Indexed in DatasetKind::ALL declaration order.
    datasets: Vec<Dataset>,
}

impl DatasetSet {
    #[must_use]
    pub fn load(data_dir: &Path) -> Self {
        let datasets = DatasetKind::ALL
            .into_iter()
            .map(|kind| {
                let path = data_dir.join(kind.file_name());
                match load_tables(&path) {
                    Ok(tables) => Dataset::new(kind, tables),
                    Err(err) => {
                        tracing::warn!(
                            kind = kind.as_str(),
                            path = %path.display(),
                            error = %err,
                            "dataset file unavailable; serving empty tables"
                        );
                        Dataset::new(kind, BTreeMap::new())
                    }
                }
            })
            .collect();
        Self { datasets }
    }

    /// Build a set from explicit datasets; kinds not provided serve empty
    /// tables.
    #[must_use]
    pub fn from_datasets<I>(datasets: I) -> Self
    where
        I: IntoIterator<Item = Dataset>,
    {
        let mut slots = DatasetKind::ALL
            .into_iter()
            .map(|kind| Dataset::new(kind, BTreeMap::new()))
            .collect::<Vec<_>>();
        for dataset in datasets {
            let slot = dataset.kind as usize;
            slots[slot] = dataset;
        }
        Self { datasets: slots }
    }

    #[must_use]
    pub fn dataset(&self, kind: DatasetKind) -> &Dataset {
        &self.datasets[kind as usize]
    }
}

fn load_tables(path: &Path) -> Result<BTreeMap<String, CategoryTable>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse dataset file {}", path.display()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryTableResult {
    pub kind: DatasetKind,
    pub requested_category: String,
    pub category: String,
    pub fuzzy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub data: CategoryTable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartData {
    pub kind: DatasetKind,
    pub category: String,
    pub fuzzy: bool,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryResult {
    pub kind: DatasetKind,
    pub category: String,
    pub fuzzy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub summary: StatisticalSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ByStateResult {
    pub kind: DatasetKind,
    pub category: String,
    pub fuzzy: bool,
    pub states: BTreeMap<String, StateAggregate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopResult {
    pub kind: DatasetKind,
    pub category: String,
    pub fuzzy: bool,
    pub entries: Vec<RankedMunicipality>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompareResult {
    pub kind: DatasetKind,
    pub category_a: String,
    pub category_b: String,
    pub entries: Vec<censo_agro_core::ComparisonEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Overview {
    pub category_counts: BTreeMap<String, usize>,
    pub crop_municipality_codes: usize,
    pub fertilizer_municipality_codes: usize,
    pub total_establishments: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MunicipalitySearchResult {
    pub code: String,
    pub name: String,
    pub state: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResellerWithCount {
    #[serde(flatten)]
    pub reseller: Reseller,
    pub municipality_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerritoryResult {
    pub reseller_id: i64,
    pub reseller_name: String,
    pub color: String,
    pub count: usize,
    pub municipalities: BTreeMap<String, MunicipalityRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportBundle {
    pub filename: String,
    pub sha256: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Facade over the loaded dataset set and the reseller store. Service and
/// CLI construct one of these and call plain-result functions; no framework
/// types cross this boundary.
#[derive(Debug, Clone)]
pub struct CensoAgroApi {
    datasets: DatasetSet,
    db_path: PathBuf,
}

impl CensoAgroApi {
    #[must_use]
    pub fn new(data_dir: &Path, db_path: PathBuf) -> Self {
        Self { datasets: DatasetSet::load(data_dir), db_path }
    }

    #[must_use]
    pub fn with_datasets(datasets: DatasetSet, db_path: PathBuf) -> Self {
        Self { datasets, db_path }
    }

    fn open_store(&self) -> ApiResult<ResellerStore> {
        let mut store = ResellerStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    #[must_use]
    pub fn list_states(&self) -> &'static [StateInfo] {
        &BRAZILIAN_STATES
    }

    #[must_use]
    pub fn categories(&self, kind: DatasetKind) -> Vec<String> {
        self.datasets.dataset(kind).category_names().into_iter().map(ToString::to_string).collect()
    }

    /// Filtered (and optionally state-restricted) table for a category,
    /// resolved exactly or via the fuzzy matcher.
    ///
    /// # Errors
    /// `CategoryNotFound` when neither an exact nor a fuzzy match exists.
    pub fn category_table(
        &self,
        kind: DatasetKind,
        category: &str,
        state: Option<&str>,
    ) -> ApiResult<CategoryTableResult> {
        let dataset = self.datasets.dataset(kind);
        let matched = dataset.lookup(category)?;
        let state = normalize_state(state);
        let validator = MunicipalityValidator::for_kind(kind);
        let data = validator.filter_table_in_state(matched.table, state.as_deref());

        Ok(CategoryTableResult {
            kind,
            requested_category: category.to_string(),
            category: matched.category.to_string(),
            fuzzy: matched.fuzzy,
            state,
            data,
        })
    }

    /// Chart series for the top `n` municipalities of a category, labels
    /// formatted `"{name} ({state})"`.
    ///
    /// # Errors
    /// `CategoryNotFound` when the category cannot be resolved.
    pub fn chart_top(&self, kind: DatasetKind, category: &str, n: usize) -> ApiResult<ChartData> {
        let dataset = self.datasets.dataset(kind);
        let matched = dataset.lookup(category)?;
        let validator = MunicipalityValidator::for_kind(kind);
        let filtered = validator.filter_table(matched.table);
        let ranked = top_n(&filtered, n);

        Ok(ChartData {
            kind,
            category: matched.category.to_string(),
            fuzzy: matched.fuzzy,
            labels: ranked.iter().map(|entry| format!("{} ({})", entry.name, entry.state)).collect(),
            values: ranked.iter().map(|entry| entry.magnitude).collect(),
        })
    }

    /// Central-tendency statistics for a category's filtered table.
    ///
    /// # Errors
    /// `CategoryNotFound` for unresolved categories; `EmptyDataset` when
    /// filtering leaves no records.
    pub fn summary(
        &self,
        kind: DatasetKind,
        category: &str,
        state: Option<&str>,
    ) -> ApiResult<SummaryResult> {
        let dataset = self.datasets.dataset(kind);
        let matched = dataset.lookup(category)?;
        let state = normalize_state(state);
        let validator = MunicipalityValidator::for_kind(kind);
        let filtered = validator.filter_table_in_state(matched.table, state.as_deref());
        let summary = statistical_summary(&filtered)?;

        Ok(SummaryResult {
            kind,
            category: matched.category.to_string(),
            fuzzy: matched.fuzzy,
            state,
            summary,
        })
    }

    /// Per-state rollup of a category's filtered table.
    ///
    /// # Errors
    /// `CategoryNotFound` when the category cannot be resolved.
    pub fn by_state(
        &self,
        kind: DatasetKind,
        category: &str,
        state: Option<&str>,
    ) -> ApiResult<ByStateResult> {
        let dataset = self.datasets.dataset(kind);
        let matched = dataset.lookup(category)?;
        let state = normalize_state(state);
        let validator = MunicipalityValidator::for_kind(kind);
        let filtered = validator.filter_table_in_state(matched.table, state.as_deref());

        Ok(ByStateResult {
            kind,
            category: matched.category.to_string(),
            fuzzy: matched.fuzzy,
            states: by_state(&filtered),
        })
    }

    /// Top `n` municipalities of a category by magnitude.
    ///
    /// # Errors
    /// `CategoryNotFound` when the category cannot be resolved.
    pub fn top(&self, kind: DatasetKind, category: &str, n: usize) -> ApiResult<TopResult> {
        let dataset = self.datasets.dataset(kind);
        let matched = dataset.lookup(category)?;
        let validator = MunicipalityValidator::for_kind(kind);
        let filtered = validator.filter_table(matched.table);

        Ok(TopResult {
            kind,
            category: matched.category.to_string(),
            fuzzy: matched.fuzzy,
            entries: top_n(&filtered, n),
        })
    }

    /// Municipality-level comparison of two categories of one kind.
    ///
    /// # Errors
    /// `CategoryNotFound` when either category cannot be resolved.
    pub fn compare(
        &self,
        kind: DatasetKind,
        category_a: &str,
        category_b: &str,
    ) -> ApiResult<CompareResult> {
        let dataset = self.datasets.dataset(kind);
        let matched_a = dataset.lookup(category_a)?;
        let matched_b = dataset.lookup(category_b)?;
        let validator = MunicipalityValidator::for_kind(kind);
        let filtered_a = validator.filter_table(matched_a.table);
        let filtered_b = validator.filter_table(matched_b.table);

        Ok(CompareResult {
            kind,
            category_a: matched_a.category.to_string(),
            category_b: matched_b.category.to_string(),
            entries: compare(&filtered_a, &filtered_b),
        })
    }

    /// Cross-kind counters for the landing overview.
    #[must_use]
    pub fn overview(&self) -> Overview {
        let category_counts = DatasetKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str().to_string(), self.datasets.dataset(kind).tables.len()))
            .collect();

        let crop_municipality_codes = distinct_codes(self.datasets.dataset(DatasetKind::Crop));
        let fertilizer = self.datasets.dataset(DatasetKind::Fertilizer);
        let fertilizer_municipality_codes = distinct_codes(fertilizer);

        let validator = MunicipalityValidator::for_kind(DatasetKind::Fertilizer);
        let total_establishments = fertilizer
            .tables
            .get("Total Estabelecimentos")
            .map(|table| validator.filter_table(table))
            .map_or(0.0, |filtered| {
                filtered.values().map(MunicipalityRecord::magnitude).sum()
            });

        Overview {
            category_counts,
            crop_municipality_codes,
            fertilizer_municipality_codes,
            total_establishments,
        }
    }

    /// Case-insensitive municipality search over the crop dataset's valid
    /// records, deduplicated by code.
    ///
    /// # Errors
    /// Validation error for queries shorter than 2 characters.
    pub fn search_municipalities(&self, query: &str) -> ApiResult<Vec<MunicipalitySearchResult>> {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Err(ApiError::Validation(
                "search query must have at least 2 characters".to_string(),
            ));
        }
        let needle = query.to_lowercase();

        let validator = MunicipalityValidator::for_kind(DatasetKind::Crop);
        let crops = self.datasets.dataset(DatasetKind::Crop);
        let mut seen = BTreeSet::new();
        let mut matches = Vec::new();

        'tables: for table in crops.tables.values() {
            for (code, record) in table {
                if matches.len() >= SEARCH_COLLECT_LIMIT {
                    break 'tables;
                }
                if seen.contains(code) || !validator.is_valid_municipality(code, record) {
                    continue;
                }

                let name = record.display_name();
                let state = record.state();
                if !name.to_lowercase().contains(&needle) && !state.to_lowercase().contains(&needle)
                {
                    continue;
                }

                seen.insert(code.clone());
                matches.push(MunicipalitySearchResult {
                    code: code.clone(),
                    name: name.to_string(),
                    state: state.to_string(),
                    full_name: format!("{name} ({state})"),
                });
            }
        }

        matches.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));
        matches.truncate(SEARCH_RETURN_LIMIT);
        Ok(matches)
    }

    /// Active resellers with their territory size.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or read.
    pub fn list_resellers(&self) -> ApiResult<Vec<ResellerWithCount>> {
        let store = self.open_store()?;
        Ok(store
            .list_active()?
            .into_iter()
            .map(|reseller| {
                let municipality_count = reseller.municipalities.len();
                ResellerWithCount { reseller, municipality_count }
            })
            .collect())
    }

    /// Fetch one active reseller.
    ///
    /// # Errors
    /// `ResellerNotFound` when no active row has the id.
    pub fn get_reseller(&self, id: i64) -> ApiResult<Reseller> {
        let store = self.open_store()?;
        store.get(id)?.ok_or(ApiError::ResellerNotFound(id))
    }

    /// Create a reseller after boundary validation and a duplicate-CNPJ check.
    ///
    /// # Errors
    /// Validation errors for missing fields or empty territory;
    /// `DuplicateCnpj` when the CNPJ is already registered.
    pub fn create_reseller(&self, new: NewReseller) -> ApiResult<Reseller> {
        if new.name.trim().is_empty() {
            return Err(ApiError::Validation("reseller name is required".to_string()));
        }
        if new.cnpj.trim().is_empty() {
            return Err(ApiError::Validation("reseller cnpj is required".to_string()));
        }
        if new.cnae.as_deref().map_or(true, |cnae| cnae.trim().is_empty()) {
            return Err(ApiError::Validation("reseller cnae is required".to_string()));
        }
        if new.municipalities.is_empty() {
            return Err(ApiError::Validation(
                "reseller requires at least one municipality".to_string(),
            ));
        }

        let mut store = self.open_store()?;
        if store.find_by_cnpj(&new.cnpj)?.is_some() {
            return Err(ApiError::DuplicateCnpj(new.cnpj));
        }
        Ok(store.create(&new)?)
    }

    /// Apply a partial update; the CNPJ is immutable.
    ///
    /// # Errors
    /// `ResellerNotFound` when no active row has the id.
    pub fn update_reseller(&self, id: i64, update: ResellerUpdate) -> ApiResult<Reseller> {
        if update.municipalities.as_ref().is_some_and(Vec::is_empty) {
            return Err(ApiError::Validation(
                "reseller requires at least one municipality".to_string(),
            ));
        }

        let mut store = self.open_store()?;
        store.update(id, &update)?.ok_or(ApiError::ResellerNotFound(id))
    }

    /// Soft-delete a reseller.
    ///
    /// # Errors
    /// `ResellerNotFound` when no active row has the id.
    pub fn delete_reseller(&self, id: i64) -> ApiResult<()> {
        let mut store = self.open_store()?;
        if store.deactivate(id)? {
            Ok(())
        } else {
            Err(ApiError::ResellerNotFound(id))
        }
    }

    /// Resolve a reseller's territory against the crop dataset.
    ///
    /// # Errors
    /// `ResellerNotFound` for unknown ids; validation error for a reseller
    /// with no municipalities assigned.
    pub fn territory(&self, id: i64) -> ApiResult<TerritoryResult> {
        let reseller = self.get_reseller(id)?;
        if reseller.municipalities.is_empty() {
            return Err(ApiError::Validation(
                "reseller has no municipalities assigned".to_string(),
            ));
        }

        let crops = self.datasets.dataset(DatasetKind::Crop);
        let municipalities = resolve_territory(&reseller.municipalities, crops);

        Ok(TerritoryResult {
            reseller_id: reseller.id,
            reseller_name: reseller.name,
            color: reseller.color,
            count: municipalities.len(),
            municipalities,
        })
    }

    /// Render the four-sheet xlsx export for a category.
    ///
    /// # Errors
    /// `CategoryNotFound` for unresolved categories; `EmptyDataset` when
    /// filtering leaves nothing to export.
    pub fn export(
        &self,
        kind: DatasetKind,
        category: &str,
        state: Option<&str>,
    ) -> ApiResult<ExportBundle> {
        let dataset = self.datasets.dataset(kind);
        let matched = dataset.lookup(category)?;
        let state = normalize_state(state);
        let validator = MunicipalityValidator::for_kind(kind);
        let filtered = validator.filter_table_in_state(matched.table, state.as_deref());
        let summary = statistical_summary(&filtered)?;

        let rows = top_n(&filtered, filtered.len());
        let states = by_state(&filtered);
        let now = OffsetDateTime::now_utc();
        let exported_at = now
            .format(&time::format_description::well_known::Rfc3339)
            .context("failed to format export timestamp")?;

        let bytes = render_workbook(
            kind,
            matched.category,
            state.as_deref(),
            &filtered,
            &rows,
            &summary,
            &states,
            &exported_at,
        )?;

        let digest = Sha256::digest(&bytes);
        let filename = format!(
            "analise_{}_{}_{}.xlsx",
            sanitize_filename_component(matched.category),
            state.as_deref().unwrap_or("Nacional"),
            timestamp_for_filename(now)?
        );

        Ok(ExportBundle { filename, sha256: hex::encode(digest), bytes })
    }
}

fn normalize_state(state: Option<&str>) -> Option<String> {
    state
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_uppercase)
}

fn distinct_codes(dataset: &Dataset) -> usize {
    dataset
        .tables
        .values()
        .flat_map(|table| table.keys())
        .collect::<BTreeSet<_>>()
        .len()
}

fn sanitize_filename_component(raw: &str) -> String {
    raw.chars().map(|ch| if matches!(ch, '/' | '\\' | ':') { '_' } else { ch }).collect()
}

fn timestamp_for_filename(now: OffsetDateTime) -> Result<String> {
    let stamp_format =
        time::format_description::parse_borrowed::<2>("[year][month][day]_[hour][minute][second]")
            .context("invalid filename timestamp format")?;
    now.format(&stamp_format).context("failed to format filename timestamp")
}

#[allow(clippy::too_many_arguments)]
fn render_workbook(
    kind: DatasetKind,
    category: &str,
    state: Option<&str>,
    filtered: &CategoryTable,
    rows: &[RankedMunicipality],
    summary: &StatisticalSummary,
    states: &BTreeMap<String, StateAggregate>,
    exported_at: &str,
) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let scope_label = state.unwrap_or(NATIONAL_SCOPE_LABEL);
    let year = f64::from(REFERENCE_YEAR);

    // Sheet 1: one row per municipality, descending by magnitude.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Dados Detalhados")?;

        let titles: &[&str] = if kind.uses_harvested_area() {
            &["Código IBGE", "Município", "Estado", "Cultura", "Área Colhida (ha)", "Ano"]
        } else {
            &["Código IBGE", "Município", "Estado", "Categoria", "Valor", "Unidade", "Ano"]
        };
        for (col, title) in titles.iter().copied().enumerate() {
            sheet.write_string_with_format(0, col_index(col), title, &header)?;
        }

        let mut row_index: u32 = 1;
        for entry in rows {
            sheet.write_string(row_index, 0, &entry.code)?;
            sheet.write_string(row_index, 1, &entry.name)?;
            sheet.write_string(row_index, 2, &entry.state)?;
            sheet.write_string(row_index, 3, category)?;
            sheet.write_number(row_index, 4, entry.magnitude)?;
            if kind.uses_harvested_area() {
                sheet.write_number(row_index, 5, year)?;
            } else {
                let unit = filtered
                    .get(&entry.code)
                    .map_or_else(|| kind.default_unit().to_string(), |record| {
                        record.unit_or_default(kind).to_string()
                    });
                sheet.write_string(row_index, 5, &unit)?;
                sheet.write_number(row_index, 6, year)?;
            }
            row_index += 1;
        }
    }

    // Sheet 2: label/value pairs.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Resumo Estatístico")?;
        sheet.write_string_with_format(0, 0, "Indicador", &header)?;
        sheet.write_string_with_format(0, 1, "Valor", &header)?;

        sheet.write_string(1, 0, "Categoria Analisada")?;
        sheet.write_string(1, 1, category)?;
        sheet.write_string(2, 0, "Estado")?;
        sheet.write_string(2, 1, scope_label)?;
        sheet.write_string(3, 0, "Ano de Referência")?;
        sheet.write_number(3, 1, year)?;
        sheet.write_string(4, 0, "Total de Municípios")?;
        #[allow(clippy::cast_precision_loss)]
        sheet.write_number(4, 1, summary.count as f64)?;
        sheet.write_string(5, 0, "Total")?;
        sheet.write_number(5, 1, summary.total)?;
        sheet.write_string(6, 0, "Média")?;
        sheet.write_number(6, 1, summary.mean)?;
        sheet.write_string(7, 0, "Máximo")?;
        sheet.write_number(7, 1, summary.max)?;
        sheet.write_string(8, 0, "Mínimo")?;
        sheet.write_number(8, 1, summary.min)?;
        sheet.write_string(9, 0, "Data de Exportação")?;
        sheet.write_string(9, 1, exported_at)?;
    }

    // Sheet 3: per-state rollup, descending by total.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Resumo por Estado")?;
        for (col, title) in ["Estado", "Total", "Municípios", "Média"].into_iter().enumerate() {
            sheet.write_string_with_format(0, col_index(col), title, &header)?;
        }

        let mut ordered = states.iter().collect::<Vec<_>>();
        ordered.sort_by(|lhs, rhs| {
            rhs.1.total.total_cmp(&lhs.1.total).then_with(|| lhs.0.cmp(rhs.0))
        });

        let mut row_index: u32 = 1;
        for (state_code, aggregate) in ordered {
            sheet.write_string(row_index, 0, state_code)?;
            sheet.write_number(row_index, 1, aggregate.total)?;
            #[allow(clippy::cast_precision_loss)]
            sheet.write_number(row_index, 2, aggregate.count as f64)?;
            sheet.write_number(row_index, 3, aggregate.average)?;
            row_index += 1;
        }
    }

    // Sheet 4: top 20 ranking.
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Top 20 Produtores")?;
        for (col, title) in ["Posição", "Município", "Estado", "Valor"].into_iter().enumerate() {
            sheet.write_string_with_format(0, col_index(col), title, &header)?;
        }

        let mut row_index: u32 = 1;
        for entry in rows.iter().take(20) {
            sheet.write_number(row_index, 0, f64::from(row_index))?;
            sheet.write_string(row_index, 1, &entry.name)?;
            sheet.write_string(row_index, 2, &entry.state)?;
            sheet.write_number(row_index, 3, entry.magnitude)?;
            row_index += 1;
        }
    }

    workbook.save_to_buffer().context("failed to render xlsx workbook")
}

fn col_index(col: usize) -> u16 {
    u16::try_from(col).unwrap_or(u16::MAX)
}

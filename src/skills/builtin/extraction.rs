//! Batch document extraction with per-document validation scoring.
//!
//! Each document goes through the [`DocumentExtractor`] one at a time with a
//! cancellation checkpoint in between. A document that fails to extract is
//! recorded and skipped; only a batch with zero successful extractions fails.
//!
//! CSV spreadsheets never reach the extractor: they are read locally and
//! every data row becomes one `expense_report` record.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ExtractionError;
use crate::extraction::{DocumentExtractor, DocumentKind, ExtractionRequest};
use crate::formulas::{FormulaConfig, round_to};
use crate::skills::base::SkillLogic;
use crate::skills::context::SkillContext;
use crate::skills::error::SkillError;
use crate::skills::input::{FieldChecks, as_amount, lookup};
use crate::skills::skill::{FieldError, ValidationResult};

pub const NAME: &str = "batch-extraction";

const IMPORTANT_CLAUSES: &[&str] = &["price_increase", "termination", "renewal"];

const CSV: &str = "text/csv";

pub const SUPPORTED_MEDIA_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    CSV,
];

/// Header keywords for each expense column; the first matching header wins.
const EXPENSE_COLUMNS: &[(&str, &[&str])] = &[
    ("property_name", &["property", "location"]),
    ("vendor_name", &["vendor", "supplier"]),
    ("amount", &["amount", "total", "cost"]),
    ("date", &["date", "period"]),
];

pub struct BatchExtraction {
    extractor: Arc<dyn DocumentExtractor>,
}

impl BatchExtraction {
    pub fn new(extractor: Arc<dyn DocumentExtractor>) -> Self {
        Self { extractor }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInput {
    pub name: String,
    /// Inferred from the file extension when absent.
    #[serde(default)]
    pub media_type: Option<String>,
    pub content_base64: String,
}

impl DocumentInput {
    pub fn media_type(&self) -> String {
        self.media_type
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| media_type_for(&self.name).to_string())
    }
}

/// Media type from a file name, defaulting to PDF.
pub fn media_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "csv" => CSV,
        _ => "application/pdf",
    }
}

#[derive(Debug, Clone, Deserialize)]
struct BatchInput {
    documents: Vec<DocumentInput>,
}

/// Confidence scoring for one extracted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentValidation {
    pub confidence_score: f64,
    pub critical_missing: Vec<String>,
    pub warnings: Vec<String>,
    pub needs_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub name: String,
    pub document_type: String,
    pub property_name: Option<String>,
    pub record: Value,
    pub validation: DocumentValidation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub name: String,
    pub message: String,
}

/// Consistency of the documents grouped under one property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyCrossCheck {
    pub document_count: usize,
    pub document_types: BTreeMap<String, usize>,
    pub vendors: Vec<String>,
    pub vendor_consistent: bool,
    pub addresses: Vec<String>,
    pub address_consistent: bool,
    pub needs_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    /// Input documents.
    pub total: usize,
    /// Extracted records; a spreadsheet contributes one per row.
    pub extracted: usize,
    pub failed: usize,
    pub needs_review: usize,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExtractionOutput {
    pub documents: Vec<ExtractedDocument>,
    pub failures: Vec<DocumentFailure>,
    pub by_property: BTreeMap<String, PropertyCrossCheck>,
    pub summary: ExtractionSummary,
}

fn text(record: &Value, path: &str) -> Option<String> {
    lookup(record, path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "null")
        .map(str::to_string)
}

fn is_present(record: &Value, path: &str) -> bool {
    match lookup(record, path) {
        None => false,
        Some(Value::String(s)) => !s.trim().is_empty() && s != "null",
        Some(_) => true,
    }
}

/// Dates arrive as `YYYY-MM-DD`, sometimes with a time suffix.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Compare two date fields. `None` if either is absent, `Some(Err)` if unparseable.
fn date_pair(record: &Value, first: &str, second: &str) -> Option<Result<(NaiveDate, NaiveDate), ()>> {
    let a = text(record, first)?;
    let b = text(record, second)?;
    Some(match (parse_date(&a), parse_date(&b)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(()),
    })
}

fn critical_fields(document_type: &str) -> &'static [&'static str] {
    match document_type {
        "invoice" => &[
            "property_name",
            "vendor_name",
            "invoice.invoice_number",
            "invoice.invoice_date",
            "invoice.amount_due",
        ],
        "contract" => &[
            "property_name",
            "vendor_name",
            "contract.effective_date",
            "contract.expiration_date",
        ],
        "expense_report" => &["property_name", "amount"],
        _ => &[],
    }
}

fn check_invoice(record: &Value, config: &FormulaConfig, score: &mut f64, warnings: &mut Vec<String>) {
    let subtotal = lookup(record, "invoice.subtotal").and_then(as_amount).unwrap_or(0.0);
    let amount_due = lookup(record, "invoice.amount_due").and_then(as_amount);

    if let Some(items) = lookup(record, "invoice.line_items").and_then(Value::as_array)
        && !items.is_empty()
    {
        let amounts: Option<Vec<f64>> = items
            .iter()
            .map(|item| match item.get("extended_amount") {
                None | Some(Value::Null) => Some(0.0),
                Some(value) => as_amount(value),
            })
            .collect();
        match amounts {
            Some(amounts) => {
                let line_total: f64 = amounts.iter().sum();
                if subtotal > 0.0 && (line_total - subtotal).abs() > config.line_item_tolerance {
                    warnings.push(format!(
                        "Line items total (${line_total:.2}) != Subtotal (${subtotal:.2})"
                    ));
                    *score -= config.major_warning_penalty;
                }
            }
            None => {
                warnings.push("Line item amounts could not be read".to_string());
                *score -= config.major_warning_penalty;
            }
        }
    }

    if let Some(due) = amount_due {
        if subtotal > 0.0 && due > 0.0 && subtotal > due {
            warnings.push(format!("Subtotal (${subtotal:.2}) > Amount Due (${due:.2})"));
            *score -= config.minor_warning_penalty;
        }
        if due < 0.0 {
            warnings.push("Negative amount due detected".to_string());
            *score -= config.major_warning_penalty;
        }
    }

    match date_pair(record, "invoice.invoice_date", "invoice.due_date") {
        Some(Ok((invoice_date, due_date))) if due_date <= invoice_date => {
            warnings.push("Due date is not after invoice date".to_string());
            *score -= config.minor_warning_penalty;
        }
        Some(Err(())) => {
            warnings.push("Invalid date format detected".to_string());
            *score -= config.minor_warning_penalty;
        }
        _ => {}
    }
}

fn check_contract(record: &Value, config: &FormulaConfig, score: &mut f64, warnings: &mut Vec<String>) {
    match date_pair(record, "contract.effective_date", "contract.expiration_date") {
        Some(Ok((effective, expiration))) if expiration <= effective => {
            warnings.push("Expiration date is not after effective date".to_string());
            *score -= config.major_warning_penalty;
        }
        Some(Err(())) => {
            warnings.push("Invalid contract date format".to_string());
            *score -= config.minor_warning_penalty;
        }
        _ => {}
    }

    let missing: Vec<&str> = IMPORTANT_CLAUSES
        .iter()
        .copied()
        .filter(|clause| !is_present(record, &format!("contract.clauses.{clause}")))
        .collect();
    if !missing.is_empty() {
        warnings.push(format!("Missing important clauses: {}", missing.join(", ")));
        *score -= config.minor_warning_penalty * missing.len() as f64;
    }

    let has_schedules = lookup(record, "contract.service_schedules")
        .and_then(Value::as_array)
        .is_some_and(|s| !s.is_empty());
    if !has_schedules {
        warnings.push("No service schedules found".to_string());
        *score -= config.major_warning_penalty;
    }
}

/// Read a CSV export into one `expense_report` record per data row.
pub fn expense_rows(source_file: &str, content: &[u8]) -> Result<Vec<Value>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content);
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(str::to_ascii_lowercase)
        .collect();
    let columns: Vec<(&str, Option<usize>)> = EXPENSE_COLUMNS
        .iter()
        .map(|(field, keywords)| {
            let index = headers
                .iter()
                .position(|h| keywords.iter().any(|k| h.contains(k)));
            (*field, index)
        })
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut record = serde_json::Map::new();
        record.insert("source_file".into(), Value::String(source_file.to_string()));
        record.insert("document_type".into(), Value::String("expense_report".into()));
        for (field, index) in &columns {
            let value = index
                .and_then(|i| row.get(i))
                .filter(|cell| !cell.is_empty())
                .map_or(Value::Null, |cell| Value::String(cell.to_string()));
            record.insert(field.to_string(), value);
        }
        record.insert("description".into(), Value::Null);
        records.push(Value::Object(record));
    }
    Ok(records)
}

fn extracted(name: String, record: Value, config: &FormulaConfig) -> ExtractedDocument {
    let validation = validate_record(&record, config);
    ExtractedDocument {
        name,
        document_type: text(&record, "document_type").unwrap_or_else(|| "unknown".to_string()),
        property_name: text(&record, "property_name"),
        record,
        validation,
    }
}

/// Score one extracted record.
pub fn validate_record(record: &Value, config: &FormulaConfig) -> DocumentValidation {
    let document_type = text(record, "document_type").unwrap_or_default();
    let mut score = 1.0;
    let mut warnings = Vec::new();

    let critical_missing: Vec<String> = critical_fields(&document_type)
        .iter()
        .filter(|field| !is_present(record, field))
        .map(|field| field.to_string())
        .collect();
    score -= config.critical_field_penalty * critical_missing.len() as f64;

    match document_type.as_str() {
        "invoice" => check_invoice(record, config, &mut score, &mut warnings),
        "contract" => check_contract(record, config, &mut score, &mut warnings),
        _ => {}
    }

    let needs_review = score < config.review_confidence_threshold || !critical_missing.is_empty();
    DocumentValidation {
        confidence_score: round_to(score.max(0.0), 2),
        critical_missing,
        warnings,
        needs_review,
    }
}

/// Group documents by property and check vendor/address consistency.
pub fn cross_validate(documents: &[ExtractedDocument]) -> BTreeMap<String, PropertyCrossCheck> {
    let mut grouped: BTreeMap<String, (Vec<&ExtractedDocument>, BTreeSet<String>, BTreeSet<String>)> =
        BTreeMap::new();

    for doc in documents {
        let property = doc
            .property_name
            .clone()
            .unwrap_or_else(|| "Unknown Location".to_string());
        let entry = grouped.entry(property).or_default();
        entry.0.push(doc);
        if let Some(vendor) = text(&doc.record, "vendor_name") {
            entry.1.insert(vendor);
        }
        if let Some(address) = text(&doc.record, "property_address") {
            entry.2.insert(address);
        }
    }

    grouped
        .into_iter()
        .map(|(property, (docs, vendors, addresses))| {
            let mut document_types = BTreeMap::new();
            for doc in &docs {
                *document_types.entry(doc.document_type.clone()).or_insert(0) += 1;
            }
            let vendor_consistent = vendors.len() <= 1;
            let address_consistent = addresses.len() <= 1;
            (
                property,
                PropertyCrossCheck {
                    document_count: docs.len(),
                    document_types,
                    vendors: vendors.into_iter().collect(),
                    vendor_consistent,
                    addresses: addresses.into_iter().collect(),
                    address_consistent,
                    needs_review: !vendor_consistent || !address_consistent,
                },
            )
        })
        .collect()
}

#[async_trait]
impl SkillLogic for BatchExtraction {
    type Output = BatchExtractionOutput;

    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Extracts invoices and contracts from documents and scores each extraction for review"
    }

    fn validate(&self, ctx: &SkillContext) -> ValidationResult {
        let mut checks = FieldChecks::new(&ctx.input);
        match checks.optional_array("documents") {
            None if lookup(&ctx.input, "documents").is_none() => {
                checks.push(FieldError::required("documents"));
            }
            None => {}
            Some(docs) if docs.is_empty() => {
                checks.push(FieldError::new("documents", "must not be empty", "EMPTY"));
            }
            Some(docs) => {
                for (i, doc) in docs.iter().enumerate() {
                    if doc.get("name").and_then(Value::as_str).is_none_or(str::is_empty) {
                        checks.push(FieldError::required(format!("documents.{i}.name")));
                    }
                    if let Some(media_type) = doc.get("media_type").filter(|v| !v.is_null()) {
                        let supported = media_type.as_str().is_some_and(|m| {
                            SUPPORTED_MEDIA_TYPES.iter().any(|s| s.eq_ignore_ascii_case(m))
                        });
                        if !supported {
                            checks.push(FieldError::new(
                                format!("documents.{i}.media_type"),
                                format!("must be one of: {}", SUPPORTED_MEDIA_TYPES.join(", ")),
                                "UNSUPPORTED_MEDIA_TYPE",
                            ));
                        }
                    }
                    match doc.get("content_base64").and_then(Value::as_str) {
                        None => checks.push(FieldError::required(format!(
                            "documents.{i}.content_base64"
                        ))),
                        Some(content) if BASE64.decode(content).is_err() => {
                            checks.push(FieldError::new(
                                format!("documents.{i}.content_base64"),
                                "is not valid base64",
                                "INVALID_ENCODING",
                            ))
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        checks.finish()
    }

    async fn run(&self, ctx: &SkillContext) -> Result<BatchExtractionOutput, SkillError> {
        let input: BatchInput = ctx.input_as()?;
        let total = input.documents.len();
        let mut documents = Vec::new();
        let mut failures = Vec::new();

        for (index, doc) in input.documents.into_iter().enumerate() {
            ctx.checkpoint()?;
            ctx.progress.report(
                (index * 100 / total.max(1)) as u8,
                format!("Extracting {}", doc.name),
            );

            let content = match BASE64.decode(doc.content_base64.as_bytes()) {
                Ok(content) => content,
                Err(e) => {
                    failures.push(DocumentFailure {
                        name: doc.name,
                        message: format!("invalid base64: {e}"),
                    });
                    continue;
                }
            };
            let media_type = doc.media_type();
            if media_type == CSV {
                match expense_rows(&doc.name, &content) {
                    Ok(rows) if !rows.is_empty() => {
                        info!(document = %doc.name, rows = rows.len(), "Read expense rows");
                        documents.extend(rows.into_iter().enumerate().map(|(row, record)| {
                            extracted(format!("{}#{}", doc.name, row + 1), record, &ctx.config)
                        }));
                    }
                    Ok(_) => failures.push(DocumentFailure {
                        name: doc.name,
                        message: "spreadsheet has no data rows".to_string(),
                    }),
                    Err(e) => {
                        warn!(document = %doc.name, error = %e, "Spreadsheet could not be read");
                        failures.push(DocumentFailure {
                            name: doc.name,
                            message: format!("unreadable spreadsheet: {e}"),
                        });
                    }
                }
                continue;
            }

            let kind = DocumentKind::from_name(&doc.name);
            let request = ExtractionRequest {
                document_name: doc.name.clone(),
                media_type,
                content,
                kind,
            };

            match self.extractor.extract(request, &ctx.cancel).await {
                Ok(response) => {
                    ctx.usage.record(&response.usage);
                    let mut record = response.record;
                    if kind != DocumentKind::Auto
                        && let Some(obj) = record.as_object_mut()
                    {
                        obj.entry("document_type")
                            .or_insert_with(|| Value::String(kind.as_str().to_string()));
                    }
                    documents.push(extracted(doc.name, record, &ctx.config));
                }
                Err(ExtractionError::Cancelled { .. }) => return Err(SkillError::cancelled()),
                Err(e) => {
                    warn!(document = %doc.name, error = %e, "Document extraction failed");
                    failures.push(DocumentFailure {
                        name: doc.name,
                        message: e.to_string(),
                    });
                }
            }
        }

        if documents.is_empty() {
            return Err(SkillError::insufficient_data(
                "documents",
                format!("No documents could be extracted ({} failed)", failures.len()),
            )
            .with_details(serde_json::json!({ "failures": failures })));
        }

        let needs_review = documents.iter().filter(|d| d.validation.needs_review).count();
        let avg_confidence = documents
            .iter()
            .map(|d| d.validation.confidence_score)
            .sum::<f64>()
            / documents.len() as f64;
        let by_property = cross_validate(&documents);

        info!(
            extracted = documents.len(),
            failed = failures.len(),
            needs_review,
            "Batch extraction complete"
        );
        ctx.progress.report(100, "Extraction complete");

        Ok(BatchExtractionOutput {
            summary: ExtractionSummary {
                total,
                extracted: documents.len(),
                failed: failures.len(),
                needs_review,
                avg_confidence: round_to(avg_confidence, 2),
            },
            documents,
            failures,
            by_property,
        })
    }
}

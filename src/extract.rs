use std::collections::BTreeMap;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::error::{ExtractError, RowError};
use crate::records::{BarangayRecord, MunicipalityRecord};
use crate::schema::{CellKind, Container, PageSchema, RowLayout};
use crate::schema::{BARANGAY_DETAIL, MUNICIPALITY_LIST};

static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static TR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// One extracted row: schema field name → normalized cell text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    pub table: usize,
    pub row: usize,
    pub fields: BTreeMap<&'static str, String>,
    pub link: Option<String>,
}

impl FieldMap {
    /// Missing fields read as empty.
    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }
}

/// A row dropped from an otherwise well-formed table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSkip {
    pub table: usize,
    pub row: usize,
    pub error: RowError,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub rows: Vec<FieldMap>,
    pub skipped: Vec<RowSkip>,
    /// Cells that lost characters in the ASCII fallback.
    pub degraded: usize,
}

#[derive(Debug)]
pub struct PageRecords<T> {
    pub records: Vec<T>,
    pub skipped: Vec<RowSkip>,
    pub degraded: usize,
}

/// Lossy decode; malformed markup still yields a document.
pub fn parse(bytes: &[u8]) -> Html {
    Html::parse_document(&String::from_utf8_lossy(bytes))
}

pub fn extract(doc: &Html, schema: &PageSchema) -> Result<Extraction, ExtractError> {
    let container = find_container(doc, schema.container)?;
    let select = schema.tables;
    let tables: Vec<ElementRef> = container
        .select(&TABLE)
        .filter(|t| select.attrs.iter().all(|&(name, value)| t.value().attr(name) == Some(value)))
        .collect();
    let found = tables.len();
    if found < select.required() {
        return Err(ExtractError::MissingTable {
            index: select.required() - 1,
            attrs: select.attrs,
            found,
        });
    }

    let take = select.take.unwrap_or(usize::MAX);
    let mut out = Extraction::default();
    for (i, table) in tables.iter().skip(select.skip).take(take).enumerate() {
        let table_idx = select.skip + i;
        match schema.layout {
            RowLayout::TableRows => {
                for (row_idx, tr) in table.select(&TR).enumerate() {
                    let cells: Vec<ElementRef> = tr.select(&TD).collect();
                    push_row(&mut out, schema, table_idx, row_idx, &cells);
                }
            }
            RowLayout::WholeTable => {
                let cells: Vec<ElementRef> = table.select(&TD).collect();
                push_row(&mut out, schema, table_idx, 0, &cells);
            }
        }
    }
    Ok(out)
}

fn find_container<'a>(doc: &'a Html, c: Container) -> Result<ElementRef<'a>, ExtractError> {
    doc.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == c.tag && e.value().id() == Some(c.id))
        .ok_or(ExtractError::MissingContainer { tag: c.tag, id: c.id })
}

fn push_row(
    out: &mut Extraction,
    schema: &PageSchema,
    table: usize,
    row: usize,
    cells: &[ElementRef],
) {
    match build_row(out, schema, table, row, cells) {
        Ok(fields) => out.rows.push(fields),
        Err(error) => skip(&mut out.skipped, schema, table, row, error),
    }
}

fn build_row(
    out: &mut Extraction,
    schema: &PageSchema,
    table: usize,
    row: usize,
    cells: &[ElementRef],
) -> Result<FieldMap, RowError> {
    if cells.len() < schema.width() {
        return Err(RowError::TooFewCells { expected: schema.width(), found: cells.len() });
    }

    let mut fields = BTreeMap::new();
    for (col, cell) in schema.columns.iter().zip(cells) {
        let raw: String = cell.text().collect();
        let (mut value, degraded) = normalize(&raw, col.kind);
        if degraded {
            out.degraded += 1;
            match col.fallback {
                Some(fallback) if value.is_empty() => {
                    warn!(field = col.field, raw = %raw.trim(), "no representable characters, writing {fallback}");
                    value = fallback.to_string();
                }
                _ => debug!(field = col.field, raw = %raw.trim(), kept = %value, "dropped non-ASCII characters"),
            }
        }
        fields.insert(col.field, value);
    }

    let link = match schema.link_column {
        Some(i) => {
            let href = cells[i]
                .select(&LINK)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|h| h.trim().to_string())
                .ok_or(RowError::MissingLink(schema.columns[i].field))?;
            Some(href)
        }
        None => None,
    };

    Ok(FieldMap { table, row, fields, link })
}

fn skip(skipped: &mut Vec<RowSkip>, schema: &PageSchema, table: usize, row: usize, error: RowError) {
    warn!(page = schema.name, table, row, "skipping row: {}", error);
    skipped.push(RowSkip { table, row, error });
}

/// Drop non-ASCII (non-ASCII whitespace becomes a plain space), trim the ends,
/// then apply the column rule. Inner spacing is kept as found. Returns the value
/// and whether any characters were dropped.
pub fn normalize(raw: &str, kind: CellKind) -> (String, bool) {
    let mut degraded = false;
    let ascii: String = raw
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii() => Some(c),
            c if c.is_whitespace() => Some(' '),
            _ => {
                degraded = true;
                None
            }
        })
        .collect();

    let trimmed = ascii.trim();
    let value = match kind {
        CellKind::Text => trimmed.to_string(),
        CellKind::Count => trimmed.replace(',', ""),
        CellKind::FirstToken => trimmed.split_whitespace().next().unwrap_or_default().to_string(),
    };
    (value, degraded)
}

fn typed<T>(
    bytes: &[u8],
    schema: &PageSchema,
    convert: impl Fn(&FieldMap) -> Result<T, RowError>,
) -> Result<PageRecords<T>, ExtractError> {
    let doc = parse(bytes);
    let extraction = extract(&doc, schema)?;

    let mut skipped = extraction.skipped;
    let mut records = Vec::with_capacity(extraction.rows.len());
    for row in &extraction.rows {
        match convert(row) {
            Ok(r) => records.push(r),
            Err(e) => skip(&mut skipped, schema, row.table, row.row, e),
        }
    }
    Ok(PageRecords { records, skipped, degraded: extraction.degraded })
}

/// Municipality rows from a list page.
pub fn municipalities(bytes: &[u8]) -> Result<PageRecords<MunicipalityRecord>, ExtractError> {
    typed(bytes, &MUNICIPALITY_LIST, MunicipalityRecord::from_fields)
}

/// Barangay rows from a municipality's detail page.
pub fn barangays(
    bytes: &[u8],
    muni_name: &str,
) -> Result<PageRecords<BarangayRecord>, ExtractError> {
    typed(bytes, &BARANGAY_DETAIL, |f| BarangayRecord::from_fields(f, muni_name))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::schema::{TableSelect, MISSING_NAME};

    fn muni<'a>(name: &'a str, code: &'a str) -> Muni<'a> {
        Muni { name, code, href: "municipality.asp?muncode=1", province: "Ilocos Norte" }
    }

    #[test]
    fn list_row_values_are_normalized() {
        let html = list_page(&[
            "<tr><td><p><a href=\"municipality.asp?muncode=012801000\">\n  Adams </a></p></td>\
             <td> 012801000 </td><td>Ilocos Norte</td><td>5th</td>\
             <td>1,178</td><td>1,785</td><td>15,931</td></tr>"
                .to_string(),
        ]);
        let page = municipalities(html.as_bytes()).unwrap();
        assert!(page.skipped.is_empty());
        assert_eq!(
            page.records,
            vec![MunicipalityRecord {
                name: "Adams".into(),
                code: "012801000".into(),
                href: "municipality.asp?muncode=012801000".into(),
                province: "Ilocos Norte".into(),
                income_class: "5th".into(),
                registered_voters: "1178".into(),
                population: "1785".into(),
                land_area: "15931".into(),
            }]
        );
    }

    #[test]
    fn inner_spacing_is_kept() {
        let html = list_page(&[
            "<tr><td><a href=\"m.asp\"> San  Jose </a></td><td>01</td><td>Ilocos   Norte</td>\
             <td>1st</td><td>1 178</td><td>1,785</td><td>15,931</td></tr>"
                .to_string(),
        ]);
        let page = municipalities(html.as_bytes()).unwrap();
        let m = &page.records[0];
        assert_eq!(m.name, "San  Jose");
        assert_eq!(m.province, "Ilocos   Norte");
        assert_eq!(m.registered_voters, "1 178");
        assert_eq!(m.population, "1785");
    }

    #[test]
    fn short_row_is_skipped_not_fatal() {
        let mut rows: Vec<String> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|n| muni_row(&muni(n, "01")))
            .collect();
        rows[2] = "<tr><td><a href=\"x\">C</a></td><td>03</td></tr>".to_string();

        let page = municipalities(list_page(&rows).as_bytes()).unwrap();
        assert_eq!(page.records.len(), 4);
        assert!(page.records.iter().all(|m| m.name != "C"));
        assert_eq!(page.skipped.len(), 1);
        assert_eq!(page.skipped[0].row, 2);
        assert_eq!(
            page.skipped[0].error,
            RowError::TooFewCells { expected: 7, found: 2 }
        );
    }

    #[test]
    fn row_without_link_or_code_is_skipped() {
        let rows = vec![
            muni_row(&muni("Good", "01")),
            "<tr><td>No Link</td><td>02</td><td>P</td><td>1st</td><td>1</td><td>1</td><td>1</td></tr>"
                .to_string(),
            muni_row(&muni("Blank", " ")),
        ];
        let page = municipalities(list_page(&rows).as_bytes()).unwrap();
        assert_eq!(page.records.len(), 1);
        let errors: Vec<_> = page.skipped.iter().map(|s| s.error.clone()).collect();
        assert_eq!(
            errors,
            vec![RowError::MissingLink("name"), RowError::EmptyField("code")]
        );
    }

    #[test]
    fn missing_container_is_structural() {
        let html = "<html><body><table><tr><td>x</td></tr></table></body></html>";
        let err = municipalities(html.as_bytes()).unwrap_err();
        assert_eq!(
            err,
            ExtractError::MissingContainer { tag: "div", id: "pageBody" }
        );
    }

    #[test]
    fn missing_data_table_is_structural() {
        let html = "<div id=\"pageBody\"><table><tr><td>only</td></tr></table></div>";
        let err = municipalities(html.as_bytes()).unwrap_err();
        assert_eq!(
            err,
            ExtractError::MissingTable { index: 0, attrs: &[("width", "550")], found: 0 }
        );
    }

    #[test]
    fn list_table_found_by_width_not_position() {
        let html = list_page_of(&[muni("Batac", "012805000")]).replace(
            "<div id=\"pageBody\">",
            "<div id=\"pageBody\"><table><tr><td>banner</td></tr></table>",
        );
        let page = municipalities(html.as_bytes()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].name, "Batac");
    }

    #[test]
    fn garbage_bytes_do_not_panic() {
        let err = municipalities(&[0xff, 0xfe, 0x00, b'<', b'<']).unwrap_err();
        assert!(matches!(err, ExtractError::MissingContainer { .. }));
    }

    #[test]
    fn extraction_is_deterministic() {
        let html = list_page_of(&[muni("Batac", "012805000"), muni("Pagudpud", "012818000")]);
        let a = municipalities(html.as_bytes()).unwrap().records;
        let b = municipalities(html.as_bytes()).unwrap().records;
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn barangays_skip_layout_tables() {
        let html = detail_page(&[
            ("Bacsil", "012801001", "Rural (based on 2010 CPH)", "1,021"),
            ("Cabucungan", "012801002", " Urban ", "564"),
        ]);
        let page = barangays(html.as_bytes(), "Adams").unwrap();
        assert!(page.skipped.is_empty());
        assert_eq!(
            page.records,
            vec![
                BarangayRecord {
                    muni_name: "Adams".into(),
                    name: "Bacsil".into(),
                    code: "012801001".into(),
                    urban_rural: "Rural".into(),
                    population: "1021".into(),
                },
                BarangayRecord {
                    muni_name: "Adams".into(),
                    name: "Cabucungan".into(),
                    code: "012801002".into(),
                    urban_rural: "Urban".into(),
                    population: "564".into(),
                },
            ]
        );
    }

    #[test]
    fn detail_page_with_no_barangays_is_empty() {
        let page = barangays(detail_page(&[]).as_bytes(), "Adams").unwrap();
        assert!(page.records.is_empty());
    }

    #[test]
    fn detail_page_without_barangay_tables_is_structural() {
        let html = "<div id=\"pageBody\"><table><tr><td>a</td></tr></table></div>";
        let err = barangays(html.as_bytes(), "Adams").unwrap_err();
        assert_eq!(
            err,
            ExtractError::MissingTable { index: 0, attrs: BARANGAY_DETAIL.tables.attrs, found: 0 }
        );
    }

    #[test]
    fn extra_layout_table_does_not_shift_barangays() {
        let html = detail_page(&[("Bacsil", "012801001", "Rural", "1,021")]).replace(
            "<div id=\"pageBody\">",
            "<div id=\"pageBody\"><table><tr><td>notice</td><td>x</td><td>y</td><td>z</td></tr></table>",
        );
        let page = barangays(html.as_bytes(), "Adams").unwrap();
        assert!(page.skipped.is_empty());
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].name, "Bacsil");
        assert_eq!(page.records[0].population, "1021");
    }

    #[test]
    fn positional_selection_reads_same_tables() {
        let by_position = PageSchema { tables: TableSelect::starting_at(3), ..BARANGAY_DETAIL };
        let html = detail_page(&[
            ("Bacsil", "012801001", "Rural", "1,021"),
            ("Tanap", "012801002", "Urban", "88"),
        ]);
        let doc = parse(html.as_bytes());

        let names = |ex: Extraction| -> Vec<String> {
            ex.rows.iter().map(|r| r.get("name").to_string()).collect()
        };
        let a = names(extract(&doc, &by_position).unwrap());
        let b = names(extract(&doc, &BARANGAY_DETAIL).unwrap());
        assert_eq!(a, vec!["Bacsil", "Tanap"]);
        assert_eq!(a, b);
    }

    #[test]
    fn unrepresentable_name_gets_placeholder() {
        let html = detail_page(&[("\u{65e5}\u{672c}", "012801003", "Rural", "10")]);
        let page = barangays(html.as_bytes(), "Adams").unwrap();
        assert!(page.skipped.is_empty());
        assert_eq!(page.records[0].name, MISSING_NAME);
        assert_eq!(page.records[0].code, "012801003");
        assert_eq!(page.degraded, 1);
    }

    #[test]
    fn non_ascii_is_dropped() {
        assert_eq!(normalize("Peñablanca", CellKind::Text), ("Peablanca".to_string(), true));
        assert_eq!(normalize("\u{a0}Lal-lo\u{a0}", CellKind::Text), ("Lal-lo".to_string(), false));
        assert_eq!(normalize("San\u{a0}Jose", CellKind::Text), ("San Jose".to_string(), false));
        assert_eq!(normalize(" 1,234,567 ", CellKind::Count), ("1234567".to_string(), false));
        assert_eq!(normalize("", CellKind::FirstToken), (String::new(), false));
    }

    #[test]
    fn degraded_cells_are_counted() {
        let html = list_page_of(&[muni("Peñarrubia", "140111000")]);
        let doc = parse(html.as_bytes());
        let ex = extract(&doc, &MUNICIPALITY_LIST).unwrap();
        assert_eq!(ex.degraded, 1);
        assert_eq!(ex.rows[0].get("name"), "Pearrubia");
    }
}

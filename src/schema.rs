//! Fixed descriptions of where data lives on each page type.
//!
//! Both page types keep their content inside `<div id="pageBody">`. List pages
//! carry one data table (`width="550"`) with a municipality per `<tr>`. Detail
//! pages open with layout tables; the barangay tables all carry
//! `width="500" cellpadding="3"`, and the first such table holds the column
//! headings.

/// Element that must exist for the page to be considered well formed.
#[derive(Debug, Clone, Copy)]
pub struct Container {
    pub tag: &'static str,
    pub id: &'static str,
}

pub type Attrs = &'static [(&'static str, &'static str)];

/// Which `<table>` elements inside the container hold data.
///
/// Tables are first filtered by `attrs` (every pair must match exactly; an
/// empty list matches all tables), then the first `skip` matches are dropped
/// and up to `take` of the rest are kept (`None` keeps them all). A page with
/// fewer than `skip + take` matches does not fit the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSelect {
    pub attrs: Attrs,
    pub skip: usize,
    pub take: Option<usize>,
}

impl TableSelect {
    /// Exactly the table at this position.
    pub const fn at(index: usize) -> Self {
        TableSelect { attrs: &[], skip: index, take: Some(1) }
    }

    /// Every table from this position on.
    pub const fn starting_at(index: usize) -> Self {
        TableSelect { attrs: &[], skip: index, take: None }
    }

    pub const fn with_attrs(self, attrs: Attrs) -> Self {
        TableSelect { attrs, ..self }
    }

    /// Matches needed before the page counts as well formed.
    pub fn required(&self) -> usize {
        self.skip + self.take.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    /// Each `<tr>` of a selected table is a record.
    TableRows,
    /// All `<td>` cells of a selected table form one record.
    WholeTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Text,
    /// Digit groups; thousands separators are removed, value stays a string.
    Count,
    /// Only the first whitespace-delimited token is kept.
    FirstToken,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub field: &'static str,
    pub kind: CellKind,
    /// Written instead when the cell had text but none of it was ASCII.
    pub fallback: Option<&'static str>,
}

const fn col(field: &'static str, kind: CellKind) -> Column {
    Column { field, kind, fallback: None }
}

impl Column {
    const fn with_fallback(self, fallback: &'static str) -> Column {
        Column { fallback: Some(fallback), ..self }
    }
}

pub const MISSING_NAME: &str = "MISSING NAME(ERROR)";

#[derive(Debug, Clone, Copy)]
pub struct PageSchema {
    pub name: &'static str,
    pub container: Container,
    pub tables: TableSelect,
    pub layout: RowLayout,
    pub columns: &'static [Column],
    /// Column whose nested `<a href>` is captured with the row.
    pub link_column: Option<usize>,
}

impl PageSchema {
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

const PAGE_BODY: Container = Container { tag: "div", id: "pageBody" };
const LIST_TABLE: Attrs = &[("width", "550")];
const BARANGAY_TABLE: Attrs = &[("width", "500"), ("cellpadding", "3")];

pub const MUNICIPALITY_LIST: PageSchema = PageSchema {
    name: "municipality list",
    container: PAGE_BODY,
    tables: TableSelect::at(0).with_attrs(LIST_TABLE),
    layout: RowLayout::TableRows,
    columns: &[
        col("name", CellKind::Text).with_fallback(MISSING_NAME),
        col("code", CellKind::Text),
        col("province", CellKind::Text),
        col("income_class", CellKind::Text),
        col("registered_voters", CellKind::Count),
        col("population", CellKind::Count),
        col("land_area", CellKind::Count),
    ],
    link_column: Some(0),
};

pub const BARANGAY_DETAIL: PageSchema = PageSchema {
    name: "barangay detail",
    container: PAGE_BODY,
    tables: TableSelect::starting_at(1).with_attrs(BARANGAY_TABLE),
    layout: RowLayout::WholeTable,
    columns: &[
        col("name", CellKind::Text).with_fallback(MISSING_NAME),
        col("code", CellKind::Text),
        col("urban_rural", CellKind::FirstToken),
        col("population", CellKind::Count),
    ],
    link_column: None,
};

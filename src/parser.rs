use crate::model::RawRow;
use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TableParser {
    container: Selector,
    table: Selector,
    row: Selector,
    cell: Selector,
}

impl TableParser {
    pub fn new(container_selector: &str) -> Result<Self> {
        Ok(Self {
            container: parse_selector(container_selector)?,
            table: parse_selector("table")?,
            row: parse_selector("tr")?,
            cell: parse_selector("td")?,
        })
    }

    pub fn parse(&self, html: &str) -> ParsedPage<'_> {
        ParsedPage {
            parser: self,
            document: Html::parse_document(html),
        }
    }
}

pub struct ParsedPage<'p> {
    parser: &'p TableParser,
    document: Html,
}

impl ParsedPage<'_> {
    pub fn containers(&self) -> usize {
        self.document.select(&self.parser.container).count()
    }

    pub fn tables(&self) -> usize {
        self.tables_by_container().count()
    }

    pub fn rows(&self) -> impl Iterator<Item = RawRow> + '_ {
        let cell = &self.parser.cell;
        self.tables_by_container()
            .flat_map(move |(container_index, table)| {
                table
                    .select(&self.parser.row)
                    .enumerate()
                    .filter_map(move |(row_index, row)| {
                        let cells = row
                            .select(cell)
                            .map(|td| td.text().collect::<String>())
                            .collect::<Vec<_>>();
                        let raw = RawRow::from_cells(&cells);
                        if raw.is_none() {
                            debug!(
                                container = container_index,
                                row = row_index,
                                cells = cells.len(),
                                "skipping row with insufficient columns"
                            );
                        }
                        raw.map(|r| r.at(container_index, row_index))
                    })
            })
    }

    fn tables_by_container(&self) -> impl Iterator<Item = (usize, ElementRef<'_>)> + '_ {
        self.document
            .select(&self.parser.container)
            .enumerate()
            .filter_map(move |(index, container)| {
                let table = container.select(&self.parser.table).next();
                if table.is_none() {
                    debug!(container = index, "no table found in container");
                }
                table.map(|t| (index, t))
            })
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|err| anyhow!("invalid selector {selector}: {err:?}"))
}

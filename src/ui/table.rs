use crate::Result;
use comfy_table::{ContentArrangement, Table};

/// A borderless table; the header is only shown to a human.
pub fn new_table(header: &[&str], hide_header: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic);
    if !hide_header && console::user_attended() {
        table.set_header(header.to_vec());
    }
    table
}

pub fn print_table(table: Table) -> Result<()> {
    let table = table.to_string();
    for line in table.lines() {
        println!("{}", line.trim());
    }
    Ok(())
}

//! SQL text generation for PostgreSQL.

use sync_core::{ReadRequest, TableName};
use tokio_postgres::Client;

/// Quote an identifier with double quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `table` or `schema.table`, quoted.
pub fn quote_table(table: &TableName) -> String {
    table.quoted(quote_ident)
}

/// SELECT statement for a read request. The watermark filter, if any, is
/// bound as `$1`.
pub fn select_sql(request: &ReadRequest, primary_key: &[String]) -> String {
    let table = quote_table(&TableName::parse(&request.table));
    let mut sql = format!("SELECT * FROM {table}");
    if let Some(filter) = &request.filter {
        sql.push_str(&format!(" WHERE {} > $1", quote_ident(&filter.column)));
    }
    let order = request.sort_columns(primary_key);
    if !order.is_empty() {
        let columns: Vec<String> = order.iter().map(|c| format!("{} ASC", quote_ident(c))).collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&columns.join(", "));
    }
    sql
}

/// Multi-row INSERT with `rows` tuples of numbered placeholders.
pub fn insert_sql(table: &TableName, columns: &[String], rows: usize) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let mut tuples = Vec::with_capacity(rows);
    let mut param_idx = 1;
    for _ in 0..rows {
        let placeholders: Vec<String> = (0..columns.len())
            .map(|_| {
                let p = format!("${param_idx}");
                param_idx += 1;
                p
            })
            .collect();
        tuples.push(format!("({})", placeholders.join(", ")));
    }
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_table(table),
        column_list.join(", "),
        tuples.join(", ")
    )
}

/// Primary key columns of `table` in key order. Empty when the table has no
/// primary key or does not exist.
pub async fn primary_key_columns(
    client: &Client,
    table: &TableName,
) -> Result<Vec<String>, tokio_postgres::Error> {
    let query = "
        SELECT a.attname::text AS column_name
        FROM pg_index i
        JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
        WHERE i.indrelid = to_regclass($1)
        AND i.indisprimary
        ORDER BY array_position(i.indkey, a.attnum)";

    let rows = client.query(query, &[&quote_table(table)]).await?;
    Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
}

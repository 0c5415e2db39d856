//! SQL text generation for MySQL.

use mysql_async::prelude::*;
use mysql_async::Conn;
use sync_core::{ReadRequest, TableName};

/// Quote an identifier with backticks.
pub fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// `table` or `schema.table`, quoted.
pub fn quote_table(table: &TableName) -> String {
    table.quoted(quote_ident)
}

/// SELECT statement for a read request. The watermark filter, if any, is the
/// single `?` placeholder.
pub fn select_sql(request: &ReadRequest, primary_key: &[String]) -> String {
    let table = quote_table(&TableName::parse(&request.table));
    let mut sql = format!("SELECT * FROM {table}");
    if let Some(filter) = &request.filter {
        sql.push_str(&format!(" WHERE {} > ?", quote_ident(&filter.column)));
    }
    let order = request.sort_columns(primary_key);
    if !order.is_empty() {
        let columns: Vec<String> = order.iter().map(|c| format!("{} ASC", quote_ident(c))).collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&columns.join(", "));
    }
    sql
}

/// Multi-row INSERT with `rows` tuples of positional placeholders.
pub fn insert_sql(table: &TableName, columns: &[String], rows: usize) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
    let tuples = vec![tuple.as_str(); rows].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_table(table),
        column_list.join(", "),
        tuples
    )
}

/// Primary key columns of `table` in key order. Empty when the table has no
/// primary key.
pub async fn primary_key_columns(
    conn: &mut Conn,
    table: &TableName,
) -> mysql_async::Result<Vec<String>> {
    let query = "
        SELECT COLUMN_NAME
        FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND TABLE_NAME = ?
        AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION";

    conn.exec(query, (table.schema.clone(), table.name.clone()))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{Value, WatermarkFilter};

    #[test]
    fn test_full_select_is_unordered() {
        let request = ReadRequest::full("customers", 1000);
        assert_eq!(select_sql(&request, &["id".into()]), "SELECT * FROM `customers`");
    }

    #[test]
    fn test_incremental_select() {
        let mut request = ReadRequest::full("sales.orders", 1000);
        request.filter = Some(WatermarkFilter {
            column: "order_id".into(),
            value: Value::Int(100),
        });
        request.order_by = vec!["order_id".into()];

        assert_eq!(
            select_sql(&request, &["order_id".into()]),
            "SELECT * FROM `sales`.`orders` WHERE `order_id` > ? ORDER BY `order_id` ASC"
        );

        request.order_by = vec!["updated_at".into()];
        assert_eq!(
            select_sql(&request, &["id".into()]),
            "SELECT * FROM `sales`.`orders` WHERE `order_id` > ? ORDER BY `updated_at` ASC, `id` ASC"
        );
    }

    #[test]
    fn test_insert_placeholders() {
        let sql = insert_sql(
            &TableName::parse("orders"),
            &["id".into(), "total".into()],
            2,
        );
        assert_eq!(sql, "INSERT INTO `orders` (`id`, `total`) VALUES (?, ?), (?, ?)");
    }

    #[test]
    fn test_backticks_are_escaped() {
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }
}

//! SQL 文の組み立て
//!
//! テーブル名はバインドできないので、構築時に識別子として検証してから埋め込みます。

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid table name {0:?}: expected `name` or `schema.name` made of [A-Za-z0-9_]")]
pub struct TableNameError(pub String);

/// A validated, optionally schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, TableNameError> {
        let invalid = || TableNameError(raw.to_string());
        let mut parts = raw.split('.');
        let first = parts.next().ok_or_else(invalid)?;
        let second = parts.next();
        if parts.next().is_some() {
            return Err(invalid());
        }

        let (schema, name) = match second {
            Some(name) => (Some(first), name),
            None => (None, first),
        };
        if !is_identifier(name) || schema.is_some_and(|s| !is_identifier(s)) {
            return Err(invalid());
        }
        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Unqualified part, used to derive index names.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

const COLUMNS: &str =
    "id, published, published_reference, created_at, published_at, subject, payload";

/// Every statement the store issues, rendered once per table.
#[derive(Debug, Clone)]
pub struct Statements {
    pub lock_unpublished: String,
    pub mark_published: String,
    pub scan_unpublished: String,
    pub insert: String,
    pub create_table: String,
    pub create_index: String,
}

impl Statements {
    pub fn for_table(table: &TableName) -> Self {
        Self {
            lock_unpublished: format!(
                "SELECT {COLUMNS} FROM {table} WHERE id = $1 AND published = false FOR UPDATE"
            ),
            mark_published: format!(
                "UPDATE {table} SET published = true, published_at = $2, published_reference = $3 \
                 WHERE id = $1 AND published = false"
            ),
            scan_unpublished: format!(
                "SELECT {COLUMNS} FROM {table} WHERE published = false AND id > $1 \
                 ORDER BY id, created_at LIMIT $2"
            ),
            insert: format!("INSERT INTO {table} (subject, payload) VALUES ($1, $2) RETURNING id"),
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id BIGSERIAL PRIMARY KEY, \
                 published BOOLEAN NOT NULL DEFAULT FALSE, \
                 published_reference VARCHAR(255), \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
                 published_at TIMESTAMPTZ, \
                 subject TEXT NOT NULL, \
                 payload BYTEA NOT NULL)"
            ),
            create_index: format!(
                "CREATE INDEX IF NOT EXISTS {}_unpublished_idx ON {table} (id) \
                 WHERE published = false",
                table.name()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_qualified_names() {
        let plain = TableName::parse("_natss_outbox").unwrap();
        assert_eq!(plain.to_string(), "_natss_outbox");

        let qualified = TableName::parse("app.outbox").unwrap();
        assert_eq!(qualified.to_string(), "app.outbox");
        assert_eq!(qualified.name(), "outbox");
    }

    #[test]
    fn rejects_anything_that_is_not_an_identifier() {
        for raw in ["", "1outbox", "out box", "outbox;drop table x", "a.b.c", "a.", "\"outbox\""] {
            assert!(TableName::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn statements_filter_on_published_flag() {
        let sql = Statements::for_table(&TableName::parse("outbox").unwrap());

        assert!(sql.lock_unpublished.ends_with("WHERE id = $1 AND published = false FOR UPDATE"));
        assert!(sql.mark_published.contains("WHERE id = $1 AND published = false"));
        assert!(sql.scan_unpublished.contains("id > $1 ORDER BY id, created_at LIMIT $2"));
        assert!(
            sql.create_index
                .starts_with("CREATE INDEX IF NOT EXISTS outbox_unpublished_idx ON outbox")
        );
    }
}

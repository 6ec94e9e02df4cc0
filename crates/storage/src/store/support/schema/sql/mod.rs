#![forbid(unsafe_code)]

mod core;
mod indexes;
mod jobs;
mod workers;

pub(super) fn full_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(core::SQL);
    sql.push_str(jobs::SQL);
    sql.push_str(workers::SQL);
    sql.push_str(indexes::SQL);
    sql
}

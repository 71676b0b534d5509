use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

table! {
    readings (id) {
        id -> Integer,
        stream -> Text,
        timestamp -> Timestamp,
        value -> Double,
    }
}

#[derive(Serialize, Debug, Clone, Queryable)]
pub struct ReadingDTO {
   pub id: i32,
   pub stream: String,
   pub timestamp: NaiveDateTime,
   pub value: f64
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = readings)]
pub struct AddReadingDTO<'a> {
   pub stream: &'a str,
   pub timestamp: NaiveDateTime,
   pub value: f64
}

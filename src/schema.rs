//! Handwritten Diesel schema for the weather store.
//!
//! Table names follow the existing store (`countries`, `cities`,
//! `daily_weather_entries`) so databases written by earlier tooling are
//! adopted in place. `sw_radiation` is declared here even though the base
//! migration does not create it: `services::migrate::prepare_store` adds it
//! before any query touches the table.

diesel::table! {
    countries (id) {
        id -> Integer,
        name -> Text,
        timezone -> Text,
    }
}

diesel::table! {
    cities (id) {
        id -> Integer,
        name -> Text,
        longitude -> Double,
        latitude -> Double,
        country_id -> Integer,
    }
}

diesel::table! {
    daily_weather_entries (id) {
        id -> Integer,
        date -> Date,
        min_temp -> Nullable<Double>,
        max_temp -> Nullable<Double>,
        mean_temp -> Nullable<Double>,
        precipitation -> Nullable<Double>,
        sw_radiation -> Double,
        city_id -> Integer,
    }
}

diesel::joinable!(cities -> countries (country_id));
diesel::joinable!(daily_weather_entries -> cities (city_id));

diesel::allow_tables_to_appear_in_same_query!(countries, cities, daily_weather_entries);

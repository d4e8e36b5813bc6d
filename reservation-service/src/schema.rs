diesel::table! {
    appointment_sequence (singleton) {
        singleton -> Bool,
        last_id -> Int4,
    }
}

diesel::table! {
    appointments (id) {
        id -> Int4,
        patient -> Varchar,
        caregiver -> Varchar,
        vaccine -> Varchar,
        scheduled_on -> Date,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    availabilities (caregiver, available_on) {
        caregiver -> Varchar,
        available_on -> Date,
    }
}

diesel::table! {
    vaccines (name) {
        name -> Varchar,
        doses -> Int4,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    appointment_sequence,
    appointments,
    availabilities,
    vaccines,
);

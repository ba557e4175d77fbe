diesel::table! {
    orders (id) {
        id -> Int4,
        user_id -> Int4,
        total_price -> Numeric,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Int4,
        order_id -> Int4,
        product_id -> Int4,
        quantity -> Int4,
        price -> Numeric,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Int4,
        stream_name -> Varchar,
        event_type -> Varchar,
        fields -> Jsonb,
        published -> Bool,
        created_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(order_items -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    order_items,
    outbox_events,
);

diesel::table! {
    products (id) {
        id -> Int4,
        name -> Varchar,
        price -> Numeric,
        quantity -> Int4,
    }
}

diesel::table! {
    processed_orders (order_id) {
        order_id -> Int4,
        status -> Varchar,
        processed_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    products,
    processed_orders,
);

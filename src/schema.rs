table! {
    ingrediente (id) {
        id -> BigInt,
        nombre -> Varchar,
        stock -> Integer,
    }
}

table! {
    maki (id) {
        id -> BigInt,
        nombre -> Varchar,
        descripcion -> Text,
        precio -> Double,
    }
}

table! {
    maki_ingrediente (maki_id, ingrediente_id) {
        maki_id -> BigInt,
        ingrediente_id -> BigInt,
    }
}

joinable!(maki_ingrediente -> maki (maki_id));
joinable!(maki_ingrediente -> ingrediente (ingrediente_id));

allow_tables_to_appear_in_same_query!(ingrediente, maki, maki_ingrediente);

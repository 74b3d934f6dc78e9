//! SeaORM entity models used by the SQLite datastore backend.
//!
//! These structs map to the tables created by `migrations`. Timestamps are
//! RFC3339 strings with nanosecond precision, integers are 64-bit. Link
//! tables carry the `belongs_to` relation the lookups join through.

pub mod users {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub created_at: String,
        pub updated_at: String,
        #[sea_orm(unique)]
        pub username: String,
        /// Argon2 PHC string
        pub password: String,
        pub name: String,
        #[sea_orm(unique)]
        pub email: String,
        pub admin: bool,
        pub enabled: bool,
        pub admin_forced_password_reset: bool,
        pub gravatar_url: String,
        pub position: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod sessions {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "sessions")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub created_at: String,
        pub accessed_at: String,
        /// Foreign key to `users.id`
        pub user_id: i64,
        #[sea_orm(unique)]
        pub key: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod password_reset_requests {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "password_reset_requests")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub created_at: String,
        pub updated_at: String,
        pub expires_at: String,
        /// Foreign key to `users.id`
        pub user_id: i64,
        pub token: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod queries {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "queries")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub created_at: String,
        pub updated_at: String,
        pub saved: bool,
        #[sea_orm(unique)]
        pub name: String,
        pub description: String,
        pub query: String,
        pub interval: i64,
        pub snapshot: bool,
        pub differential: bool,
        pub platform: String,
        pub version: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod packs {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "packs")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub created_at: String,
        pub updated_at: String,
        #[sea_orm(unique)]
        pub name: String,
        pub platform: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Query membership of packs.
pub mod pack_queries {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "pack_queries")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub pack_id: i64,
        #[sea_orm(primary_key, auto_increment = false)]
        pub query_id: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::queries::Entity",
            from = "Column::QueryId",
            to = "super::queries::Column::Id"
        )]
        Query,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Label targets of packs.
pub mod pack_labels {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "pack_labels")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub pack_id: i64,
        #[sea_orm(primary_key, auto_increment = false)]
        pub label_id: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::labels::Entity",
            from = "Column::LabelId",
            to = "super::labels::Column::Id"
        )]
        Label,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod labels {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "labels")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub created_at: String,
        pub updated_at: String,
        #[sea_orm(unique)]
        pub name: String,
        pub description: String,
        pub query: String,
        pub platform: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod label_query_executions {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "label_query_executions")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub updated_at: String,
        pub matches: bool,
        pub label_id: i64,
        pub host_id: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::labels::Entity",
            from = "Column::LabelId",
            to = "super::labels::Column::Id"
        )]
        Label,
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod hosts {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "hosts")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub created_at: String,
        pub updated_at: String,
        pub detail_update_time: String,
        pub seen_time: String,
        #[sea_orm(unique)]
        pub node_key: String,
        pub host_name: String,
        #[sea_orm(unique)]
        pub uuid: String,
        pub platform: String,
        pub osquery_version: String,
        pub os_version: String,
        pub uptime: i64,
        pub physical_memory: i64,
        pub primary_mac: String,
        pub primary_ip: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

use refract::{
    AssociationOptions, AttributeType, EntityDef, EntityHandle, Record, RefractClient,
    SchemaBuilder,
};
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;

#[allow(dead_code)]
pub async fn setup_test_db() -> DatabaseConnection {
    refract::hooks::init_logging();
    Database::connect("sqlite::memory:").await.unwrap()
}

/// User -< Project -< Task, declared from both sides.
#[allow(dead_code)]
pub struct Chain {
    pub client: RefractClient,
    pub user: EntityHandle,
    pub project: EntityHandle,
    pub task: EntityHandle,
}

#[allow(dead_code)]
pub async fn setup_chain() -> Chain {
    let mut schema = SchemaBuilder::new();
    let user = schema
        .define(EntityDef::new("User").attribute("username", AttributeType::String))
        .unwrap();
    let task = schema
        .define(EntityDef::new("Task").attribute("title", AttributeType::String))
        .unwrap();
    let project = schema
        .define(EntityDef::new("Project").attribute("title", AttributeType::String))
        .unwrap();
    schema.belongs_to(&project, &user, AssociationOptions::new()).unwrap();
    schema.has_many(&user, &project, AssociationOptions::new()).unwrap();
    schema.belongs_to(&task, &project, AssociationOptions::new()).unwrap();
    schema.has_many(&project, &task, AssociationOptions::new()).unwrap();

    let client = RefractClient::new(setup_test_db().await, Arc::new(schema.finish()));
    client.sync(true).await.unwrap();
    Chain {
        client,
        user,
        project,
        task,
    }
}

/// leia owns "republic" with two tasks, vader owns "empire" with two tasks.
#[allow(dead_code)]
pub async fn seed_chain(chain: &Chain) {
    let client = &chain.client;
    client
        .bulk_create(&chain.user)
        .row([("username", "leia")])
        .row([("username", "vader")])
        .exec()
        .await
        .unwrap();
    for (user_id, title) in [(1, "republic"), (2, "empire")] {
        client
            .create(&chain.project)
            .set("user_id", user_id)
            .set("title", title)
            .exec()
            .await
            .unwrap();
    }
    for (project_id, title) in [
        (1, "fight empire"),
        (1, "stablish republic"),
        (2, "destroy rebel alliance"),
        (2, "rule everything"),
    ] {
        client
            .create(&chain.task)
            .set("project_id", project_id)
            .set("title", title)
            .exec()
            .await
            .unwrap();
    }
}

/// User >-< Project through the UsersProjects join entity.
#[allow(dead_code)]
pub struct Connector {
    pub client: RefractClient,
    pub user: EntityHandle,
    pub project: EntityHandle,
    pub users_projects: EntityHandle,
}

#[allow(dead_code)]
pub async fn setup_connector() -> Connector {
    let mut schema = SchemaBuilder::new();
    let user = schema
        .define(EntityDef::new("User").attribute("username", AttributeType::String))
        .unwrap();
    let project = schema
        .define(
            EntityDef::new("Project")
                .attribute("title", AttributeType::String)
                .attribute("active", AttributeType::Boolean),
        )
        .unwrap();
    let users_projects = schema
        .define(EntityDef::join_table("UsersProjects").timestamps())
        .unwrap();
    schema
        .belongs_to_many(&user, &project, AssociationOptions::new().through(&users_projects))
        .unwrap();
    schema
        .belongs_to_many(&project, &user, AssociationOptions::new().through(&users_projects))
        .unwrap();

    let client = RefractClient::new(setup_test_db().await, Arc::new(schema.finish()));
    client.sync(true).await.unwrap();
    Connector {
        client,
        user,
        project,
        users_projects,
    }
}

#[allow(dead_code)]
pub fn titles(records: &[Record]) -> Vec<String> {
    records.iter().filter_map(|r| r.get_string("title")).collect()
}

#[allow(dead_code)]
pub fn usernames(records: &[Record]) -> Vec<String> {
    records.iter().filter_map(|r| r.get_string("username")).collect()
}

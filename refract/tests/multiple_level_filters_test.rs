#[path = "helpers.rs"]
mod helpers;

use helpers::*;
use refract::{IncludeSpec, OrderSpec, Predicate, RefractKey};
use sea_orm::sea_query::{QueryStatementWriter, SqliteQueryBuilder};

#[tokio::test]
async fn test_can_filter_through_belongs_to() {
    let chain = setup_chain().await;
    seed_chain(&chain).await;

    let tasks = chain
        .client
        .find_all(&chain.task)
        .with(IncludeSpec::new(&chain.project).include(
            IncludeSpec::new(&chain.user).filter(Predicate::eq("username", "leia")),
        ))
        .exec()
        .await
        .unwrap();

    assert_eq!(titles(&tasks), vec!["fight empire", "stablish republic"]);
    for task in &tasks {
        let project = task.one("Project").unwrap();
        let user = project.one("User").unwrap();
        assert_eq!(user.get_string("username").as_deref(), Some("leia"));
    }
}

#[tokio::test]
async fn test_avoids_duplicated_tables_in_query() {
    let chain = setup_chain().await;
    seed_chain(&chain).await;

    let query = chain.client.find_all(&chain.task).with(
        IncludeSpec::new(&chain.project).include(IncludeSpec::new(&chain.user).filter(
            Predicate::all([Predicate::eq("username", "leia"), Predicate::eq("id", 1)]),
        )),
    );

    let plan = query.plan().unwrap();
    let user_steps = plan
        .steps()
        .iter()
        .filter(|s| s.entity == chain.user.id())
        .count();
    assert_eq!(user_steps, 1);

    let sql = query
        .statement()
        .unwrap()
        .statement
        .to_string(SqliteQueryBuilder);
    assert_eq!(sql.matches(r#"JOIN "user""#).count(), 1, "{}", sql);

    let tasks = query.exec().await.unwrap();
    assert_eq!(titles(&tasks), vec!["fight empire", "stablish republic"]);
}

#[tokio::test]
async fn test_same_include_listed_twice_joins_once() {
    let chain = setup_chain().await;
    seed_chain(&chain).await;

    let tasks = chain
        .client
        .find_all(&chain.task)
        .with(IncludeSpec::new(&chain.project).include(
            IncludeSpec::new(&chain.user).filter(Predicate::eq("username", "leia")),
        ))
        .with(
            IncludeSpec::new(&chain.project)
                .include(IncludeSpec::new(&chain.user).filter(Predicate::eq("id", 1))),
        )
        .exec()
        .await
        .unwrap();
    assert_eq!(titles(&tasks), vec!["fight empire", "stablish republic"]);
}

#[tokio::test]
async fn test_can_filter_through_has_many() {
    let chain = setup_chain().await;
    seed_chain(&chain).await;

    let users = chain
        .client
        .find_all(&chain.user)
        .with(IncludeSpec::new(&chain.project).include(
            IncludeSpec::new(&chain.task).filter(Predicate::eq("title", "fight empire")),
        ))
        .exec()
        .await
        .unwrap();

    assert_eq!(usernames(&users), vec!["leia"]);
    let projects = users[0].many("Project");
    assert_eq!(titles(projects), vec!["republic"]);
    assert_eq!(titles(projects[0].many("Task")), vec!["fight empire"]);
}

#[tokio::test]
async fn test_can_filter_through_has_many_connector() {
    let connector = setup_connector().await;
    let client = &connector.client;
    client
        .bulk_create(&connector.user)
        .row([("username", "leia")])
        .row([("username", "vader")])
        .exec()
        .await
        .unwrap();
    client
        .bulk_create(&connector.project)
        .row([("title", "republic")])
        .row([("title", "empire")])
        .exec()
        .await
        .unwrap();

    let leia = client.find(&connector.user, 1).exec().await.unwrap().unwrap();
    let republic = client.find(&connector.project, 1).exec().await.unwrap().unwrap();
    client
        .set_associations(
            &connector.user,
            "Project",
            RefractKey::Int(leia.get_i64("id").unwrap()),
            [RefractKey::Int(republic.get_i64("id").unwrap())],
        )
        .exec()
        .await
        .unwrap();
    client
        .set_associations(&connector.user, "Project", 2, [2])
        .exec()
        .await
        .unwrap();

    let users = client
        .find_all(&connector.user)
        .with(IncludeSpec::new(&connector.project).filter(Predicate::eq("title", "republic")))
        .exec()
        .await
        .unwrap();
    assert_eq!(usernames(&users), vec!["leia"]);
    assert_eq!(titles(users[0].many("Project")), vec!["republic"]);
}

#[tokio::test]
async fn test_offset_and_limit_filter_through_has_many_connector() {
    let connector = setup_connector().await;
    let client = &connector.client;

    let users = client
        .bulk_create(&connector.user)
        .row([("username", "User 1")])
        .row([("username", "User 2")])
        .row([("username", "User 3")])
        .row([("username", "User 4")])
        .row([("username", "User 5")])
        .row([("username", "User 6")])
        .row([("username", "User 7")])
        .exec()
        .await
        .unwrap();
    assert_eq!(users.len(), 7);

    let mut projects = client.bulk_create(&connector.project);
    for (i, active) in [true, false, true, true, false, true, true, false, true, false]
        .into_iter()
        .enumerate()
    {
        projects = projects.row([
            ("title", sea_orm::Value::from(format!("Project {}", i + 1))),
            ("active", sea_orm::Value::from(active)),
        ]);
    }
    projects.exec().await.unwrap();

    let links: [(i32, &[i32]); 7] = [
        (1, &[1, 2, 3]),
        (2, &[5, 8]),
        (3, &[4]),
        (4, &[6]),
        (5, &[7]),
        (6, &[9]),
        (7, &[10]),
    ];
    for (user_id, project_ids) in links {
        client
            .set_associations(&connector.user, "Project", user_id, project_ids.iter().copied())
            .exec()
            .await
            .unwrap();
    }

    let page = client
        .find_all(&connector.user)
        .with(IncludeSpec::new(&connector.project).filter(Predicate::eq("active", true)))
        .order_by(OrderSpec::asc("id"))
        .skip(0)
        .take(2)
        .exec()
        .await
        .unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(usernames(&page), vec!["User 1", "User 3"]);
    assert_eq!(titles(page[0].many("Project")), vec!["Project 1", "Project 3"]);
    assert_eq!(titles(page[1].many("Project")), vec!["Project 4"]);
}

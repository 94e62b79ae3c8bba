//! End-to-end scenarios: typed table semantics, SQL round trips, snapshot
//! retention and restore.

use rowbase::{
    record, DatabaseManager, PersistenceConfig, RowbaseError, SnapshotScheduler, SqlExecutor,
    Value,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

record! {
    pub struct Person("e2e.Person") {
        id as "Id": i32 => Int32 [primary_key auto_increment],
        name as "Name": String => String [required],
    }
}

record! {
    pub struct Pet("e2e.Pet") {
        id as "Id": i32 => Int32 [primary_key auto_increment],
        owner_id as "OwnerId": Option<i32> => Int32 [references "e2e.Person"],
        name as "Name": String => String,
    }
}

fn person(name: &str) -> Person {
    Person {
        id: 0,
        name: name.to_string(),
    }
}

fn manager() -> Arc<DatabaseManager> {
    let manager = DatabaseManager::new();
    manager.create_database("app").unwrap();
    manager.create_table::<Person>("app", Some("People")).unwrap();
    manager.create_table::<Pet>("app", Some("Pets")).unwrap();
    manager
}

#[test]
fn scenario_auto_increment_and_clone_independence() {
    let manager = manager();
    let people = manager.get_table::<Person>("app", "People").unwrap();

    let mut caller = person("A");
    people.insert(&caller).unwrap();
    caller.name = "X".to_string();

    let stored = people.find_by_pk(&Value::Int32(1)).unwrap();
    assert_eq!(stored.id, 1);
    assert_eq!(stored.name, "A");
}

#[test]
fn scenario_preset_then_auto() {
    let manager = manager();
    let people = manager.get_table::<Person>("app", "People").unwrap();

    people
        .insert(&Person {
            id: 10,
            name: "M".to_string(),
        })
        .unwrap();
    let second = people.insert(&person("N")).unwrap();
    assert_eq!(second.id, 11);
}

#[test]
fn scenario_insert_range_presets_win() {
    let manager = manager();
    let people = manager.get_table::<Person>("app", "People").unwrap();

    people
        .insert_range(&[
            Person {
                id: 3,
                name: "a".into(),
            },
            Person {
                id: 7,
                name: "b".into(),
            },
        ])
        .unwrap();
    let next = people.insert(&person("c")).unwrap();
    assert_eq!(next.id, 8);
}

#[test]
fn scenario_fk_blocks_delete_until_children_removed() {
    let manager = manager();
    let people = manager.get_table::<Person>("app", "People").unwrap();
    let pets = manager.get_table::<Pet>("app", "Pets").unwrap();

    people.insert(&person("P")).unwrap();
    pets.insert(&Pet {
        id: 0,
        owner_id: Some(1),
        name: "C".to_string(),
    })
    .unwrap();

    let err = people.delete_by_pk(&Value::Int32(1)).unwrap_err();
    assert!(matches!(err, RowbaseError::ReferentialIntegrity(_)));
    assert_eq!(people.len(), 1);

    assert_eq!(pets.delete(|p| p.owner_id == Some(1)).unwrap(), 1);
    assert!(people.delete_by_pk(&Value::Int32(1)).unwrap());
}

#[test]
fn scenario_pk_index_covers_every_row() {
    let manager = manager();
    let people = manager.get_table::<Person>("app", "People").unwrap();
    for i in 0..50 {
        people.insert(&person(&format!("p{}", i))).unwrap();
    }
    people.delete(|p| p.id % 7 == 0).unwrap();

    for row in people.rows() {
        let found = people.find_by_pk(&Value::Int32(row.id)).unwrap();
        assert_eq!(found.name, row.name);
        assert!(row.id > 0);
    }
}

#[test]
fn scenario_sql_join_order_by() {
    let manager = manager();
    let executor = SqlExecutor::new(manager.clone());
    for sql in [
        "INSERT INTO People (Name) VALUES ('Alice')",
        "INSERT INTO People (Name) VALUES ('Bob')",
        "INSERT INTO Pets (OwnerId, Name) VALUES (1, 'Rex')",
        "INSERT INTO Pets (OwnerId, Name) VALUES (2, 'Ada')",
        "INSERT INTO Pets (OwnerId, Name) VALUES (1, 'Bo')",
    ] {
        executor.execute(sql).unwrap();
    }

    let result = executor
        .execute(
            "SELECT p.Name AS Owner, t.Name AS Pet FROM People p \
             JOIN Pets t ON p.Id = t.OwnerId ORDER BY Pet",
        )
        .unwrap();
    let rows = result.rows.unwrap();
    let pairs: Vec<(String, String)> = rows
        .iter()
        .map(|r| {
            (
                r.get("Owner").unwrap().to_string(),
                r.get("Pet").unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("Bob".into(), "Ada".into()),
            ("Alice".into(), "Bo".into()),
            ("Alice".into(), "Rex".into()),
        ]
    );
}

#[test]
fn scenario_serialize_deserialize_identity() {
    let manager = manager();
    let people = manager.get_table::<Person>("app", "People").unwrap();
    let pets = manager.get_table::<Pet>("app", "Pets").unwrap();
    people.insert(&person("A")).unwrap();
    people.insert(&person("B")).unwrap();
    pets.insert(&Pet {
        id: 0,
        owner_id: Some(2),
        name: "Rex".to_string(),
    })
    .unwrap();

    let before = manager.serialize_databases().unwrap();
    manager.deserialize_databases(&before).unwrap();
    let after = manager.serialize_databases().unwrap();
    assert_eq!(before, after);

    let db = manager.get_database("app").unwrap();
    assert_eq!(db.table_names(), vec!["People".to_string(), "Pets".to_string()]);
}

#[test]
fn scenario_snapshot_retention() {
    let dir = tempdir().unwrap();
    let manager = manager();
    let config = PersistenceConfig::new("app", dir.path())
        .interval(Duration::from_secs(3600))
        .max_history(2);

    let scheduler = SnapshotScheduler::start(manager, config.clone()).unwrap();
    let mut written: Vec<std::path::PathBuf> = Vec::new();
    for _ in 0..3 {
        assert!(scheduler.trigger_backup());
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let path = entry.unwrap().path();
            if !written.contains(&path) {
                written.push(path);
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    scheduler.stop();

    // Millisecond stamps keep the three backups distinct; only the two
    // newest survive retention.
    assert_eq!(written.len(), 3);
    let left: Vec<std::path::PathBuf> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(left.len(), 2);
    assert!(!written[0].exists());
    assert!(written[1].exists() && written[2].exists());
}

#[test]
fn scenario_restore_newest() {
    let dir = tempdir().unwrap();
    let config = PersistenceConfig::new("app", dir.path())
        .interval(Duration::from_secs(3600))
        .max_history(5);

    {
        let manager = manager();
        let people = manager.get_table::<Person>("app", "People").unwrap();
        let scheduler = SnapshotScheduler::start(manager.clone(), config.clone()).unwrap();
        people.insert(&person("Alpha")).unwrap();
        assert!(scheduler.trigger_backup());
        std::thread::sleep(Duration::from_millis(30));
        people.insert(&person("Beta")).unwrap();
        assert!(scheduler.trigger_backup());
        scheduler.stop();
    }

    let fresh = DatabaseManager::new();
    fresh.row_types().register::<Person>();
    fresh.row_types().register::<Pet>();
    let scheduler = SnapshotScheduler::start(fresh.clone(), config).unwrap();
    assert!(scheduler.restore_latest().unwrap());
    scheduler.stop();

    let people = fresh.get_table::<Person>("app", "People").unwrap();
    let names: Vec<String> = people.rows().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["Alpha".to_string(), "Beta".to_string()]);
}

#[test]
fn scenario_concurrent_readers_see_monotonic_growth() {
    let manager = manager();
    let people = manager.get_table::<Person>("app", "People").unwrap();

    let writer_table = people.clone();
    let writer = std::thread::spawn(move || {
        for i in 0..500 {
            writer_table.insert(&person(&format!("w{}", i))).unwrap();
        }
    });

    let mut last_seen = 0;
    while last_seen < 500 {
        let rows = writer_snapshot(&people);
        assert!(rows.len() >= last_seen, "row count went backwards");
        last_seen = rows.len();

        let mut ids: Vec<i32> = rows.iter().map(|p| p.id).collect();
        assert!(ids.iter().all(|id| *id > 0));
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), rows.len(), "duplicate primary keys observed");
    }
    writer.join().unwrap();
}

fn writer_snapshot(table: &rowbase::Table<Person>) -> Vec<Person> {
    table.rows()
}

#[test]
fn scenario_serialize_allows_concurrent_table_creation() {
    record! {
        pub struct Extra("e2e.Extra") {
            id as "Id": i32 => Int32 [primary_key auto_increment],
        }
    }

    let manager = manager();
    let spawner = manager.clone();
    let creator = std::thread::spawn(move || {
        for i in 0..20 {
            spawner
                .create_table::<Extra>("app", Some(&format!("Extra{}", i)))
                .unwrap();
        }
    });

    for _ in 0..20 {
        manager.serialize_databases().unwrap();
    }
    creator.join().unwrap();

    // Everything registered during the churn shows up in the next pass.
    let final_form = manager.serialize_databases().unwrap();
    for i in 0..20 {
        assert!(final_form.contains(&format!("Extra{}", i)));
    }
}

use std::sync::Arc;

use learn_core::model::{Identity, ModuleId, ProgressMirrorEntry, ProgressRecord, UserId};
use storage::{FileKeyValueStore, KeyValueStore, LocalMirror};

#[test]
fn file_backed_mirror_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let identity = Identity::User(UserId::new(9));
    let module = ModuleId::new(2);
    let record = ProgressRecord::new(3, [1, 2]).unwrap();

    {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(dir.path()).unwrap());
        let mirror = LocalMirror::new(store, identity);
        mirror
            .update_progress(module, |entry| {
                *entry = Some(ProgressMirrorEntry::from_record(&record));
            })
            .unwrap();
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(dir.path()).unwrap());
    let mirror = LocalMirror::new(store, identity);
    let loaded = mirror.load_progress(module).expect("entry persisted");
    assert_eq!(loaded.record().unwrap(), record);
}

#[test]
fn concurrent_writers_do_not_lose_updates() {
    let mirror = LocalMirror::new(
        Arc::new(storage::InMemoryKeyValueStore::new()),
        Identity::Anonymous,
    );
    let module = ModuleId::new(1);

    let handles: Vec<_> = (1..=8_u32)
        .map(|section| {
            let mirror = mirror.clone();
            std::thread::spawn(move || {
                mirror
                    .update_progress(module, |entry| {
                        let mut record = entry
                            .as_ref()
                            .and_then(|e| e.record().ok())
                            .unwrap_or_default();
                        record.merge_in(&ProgressRecord::new(section, [section]).unwrap());
                        *entry = Some(ProgressMirrorEntry::from_record(&record));
                    })
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let record = mirror.load_progress(module).unwrap().record().unwrap();
    assert_eq!(record.section_max(), 8);
    assert_eq!(record.completed_sections().len(), 8);
}

//! # comprehensive storage tests
//!
//! why: verify persistence and crash recovery behave correctly
//! relations: tests the replog-storage crate against replog-core types
//! what: in-memory and file backends, restart scenarios, atomic writes, edge cases

use replog_core::{LogEntry, PeerId};
use replog_storage::{FileStorage, InMemoryStorage, Storage};
use std::fs;
use tempfile::tempdir;

fn voter(id: &str) -> PeerId {
    PeerId::new("127.0.0.1:0", id)
}

// =============================================================================
// SECTION 1: IN-MEMORY STORAGE
// =============================================================================

mod in_memory {
    use super::*;

    #[test]
    fn new_storage_has_default_values() {
        let storage = InMemoryStorage::new();
        let (term, voted_for) = storage.load_term_and_vote().unwrap();

        assert_eq!(term, 0);
        assert_eq!(voted_for, None);
        assert!(storage.load_log().unwrap().is_empty());
    }

    #[test]
    fn save_and_load_term_and_vote() {
        let mut storage = InMemoryStorage::new();

        let voted = voter("c");
        storage.save_term_and_vote(5, Some(&voted)).unwrap();
        let (term, voted_for) = storage.load_term_and_vote().unwrap();

        assert_eq!(term, 5);
        assert_eq!(voted_for, Some(voted));
    }

    #[test]
    fn save_voted_for_none() {
        let mut storage = InMemoryStorage::new();

        storage.save_term_and_vote(10, None).unwrap();
        let (term, voted_for) = storage.load_term_and_vote().unwrap();

        assert_eq!(term, 10);
        assert_eq!(voted_for, None);
    }

    #[test]
    fn overwrite_term_and_vote() {
        let mut storage = InMemoryStorage::new();

        let first = voter("a");
        let second = voter("b");
        storage.save_term_and_vote(1, Some(&first)).unwrap();
        storage.save_term_and_vote(5, Some(&second)).unwrap();

        let (term, voted_for) = storage.load_term_and_vote().unwrap();
        assert_eq!(term, 5);
        assert_eq!(voted_for, Some(second));
    }

    #[test]
    fn save_log_replaces_contents() {
        let mut storage = InMemoryStorage::new();

        storage
            .save_log(&[
                LogEntry::new(1, b"a".to_vec()),
                LogEntry::new(1, b"b".to_vec()),
                LogEntry::new(2, b"c".to_vec()),
            ])
            .unwrap();
        // a shorter log after a conflict truncation
        storage.save_log(&[LogEntry::new(1, b"a".to_vec())]).unwrap();

        let log = storage.load_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].command, b"a".to_vec());
    }

    #[test]
    fn save_empty_log() {
        let mut storage = InMemoryStorage::new();

        storage.save_log(&[LogEntry::new(1, b"a".to_vec())]).unwrap();
        storage.save_log(&[]).unwrap();

        assert!(storage.load_log().unwrap().is_empty());
    }

    #[test]
    fn clear_resets_all_state() {
        let mut storage = InMemoryStorage::new();
        let voted = voter("e");
        storage.save_term_and_vote(10, Some(&voted)).unwrap();
        storage.save_log(&[LogEntry::new(1, b"cmd".to_vec())]).unwrap();

        storage.clear().unwrap();

        let (term, voted_for) = storage.load_term_and_vote().unwrap();
        assert_eq!(term, 0);
        assert_eq!(voted_for, None);
        assert!(storage.load_log().unwrap().is_empty());
    }
}

// =============================================================================
// SECTION 2: FILE STORAGE
// =============================================================================

mod file_storage {
    use super::*;

    #[test]
    fn create_storage_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replog_data");

        FileStorage::new(&path).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn new_storage_has_default_values() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        let (term, voted_for) = storage.load_term_and_vote().unwrap();

        assert_eq!(term, 0);
        assert_eq!(voted_for, None);
    }

    #[test]
    fn save_and_load_term_and_vote() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        let voted = voter("b");
        storage.save_term_and_vote(7, Some(&voted)).unwrap();
        let (term, voted_for) = storage.load_term_and_vote().unwrap();

        assert_eq!(term, 7);
        assert_eq!(voted_for, Some(voted));
    }

    #[test]
    fn save_creates_meta_file() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_term_and_vote(5, None).unwrap();

        assert!(dir.path().join("meta.json").exists());
    }

    #[test]
    fn save_log_and_load_entries() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        let log = vec![
            LogEntry::new(1, b"SET key1 value1".to_vec()),
            LogEntry::new(1, b"SET key2 value2".to_vec()),
        ];
        storage.save_log(&log).unwrap();

        let loaded = storage.load_log().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].command, b"SET key1 value1".to_vec());
        assert!(dir.path().join("log.json").exists());
    }

    #[test]
    fn shorter_log_overwrites_longer_one() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage
            .save_log(&[
                LogEntry::new(1, vec![1]),
                LogEntry::new(2, vec![2]),
                LogEntry::new(3, vec![3]),
            ])
            .unwrap();
        storage.save_log(&[LogEntry::new(1, vec![1])]).unwrap();

        let log = storage.load_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].term, 1);
    }
}

// =============================================================================
// SECTION 3: CRASH RECOVERY
// =============================================================================

mod crash_recovery {
    use super::*;

    #[test]
    fn term_survives_restart() {
        let dir = tempdir().unwrap();
        let voted = voter("e");

        // first "session"
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.save_term_and_vote(10, Some(&voted)).unwrap();
        }

        // "restart" - new storage instance
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            let (term, voted_for) = storage.load_term_and_vote().unwrap();

            assert_eq!(term, 10);
            assert_eq!(voted_for, Some(voted));
        }
    }

    #[test]
    fn log_survives_restart() {
        let dir = tempdir().unwrap();

        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage
                .save_log(&[
                    LogEntry::new(1, b"cmd1".to_vec()),
                    LogEntry::new(1, b"cmd2".to_vec()),
                ])
                .unwrap();
        }

        {
            let storage = FileStorage::new(dir.path()).unwrap();
            let log = storage.load_log().unwrap();

            assert_eq!(log.len(), 2);
            assert_eq!(log[0].command, b"cmd1".to_vec());
            assert_eq!(log[1].command, b"cmd2".to_vec());
        }
    }

    #[test]
    fn multiple_restarts_preserve_latest_state() {
        let dir = tempdir().unwrap();

        // session 1
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.save_term_and_vote(1, Some(&voter("a"))).unwrap();
            storage.save_log(&[LogEntry::new(1, b"a".to_vec())]).unwrap();
        }

        // session 2
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.save_term_and_vote(2, Some(&voter("b"))).unwrap();
            storage
                .save_log(&[
                    LogEntry::new(1, b"a".to_vec()),
                    LogEntry::new(2, b"b".to_vec()),
                ])
                .unwrap();
        }

        // session 3 - verify
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            let (term, voted_for) = storage.load_term_and_vote().unwrap();
            let log = storage.load_log().unwrap();

            assert_eq!(term, 2);
            assert_eq!(voted_for, Some(voter("b")));
            assert_eq!(log.len(), 2);
        }
    }

    #[test]
    fn clear_removes_all_files() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_term_and_vote(5, Some(&voter("c"))).unwrap();
        storage.save_log(&[LogEntry::new(1, b"cmd".to_vec())]).unwrap();

        storage.clear().unwrap();

        assert!(!dir.path().join("meta.json").exists());
        assert!(!dir.path().join("log.json").exists());
    }

    #[test]
    fn load_after_clear_returns_defaults() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_term_and_vote(5, Some(&voter("c"))).unwrap();
        storage.save_log(&[LogEntry::new(1, b"cmd".to_vec())]).unwrap();
        storage.clear().unwrap();

        let (term, voted_for) = storage.load_term_and_vote().unwrap();
        assert_eq!(term, 0);
        assert_eq!(voted_for, None);
        assert!(storage.load_log().unwrap().is_empty());
    }
}

// =============================================================================
// SECTION 4: ATOMIC WRITES
// =============================================================================

mod atomic_writes {
    use super::*;

    #[test]
    fn meta_file_is_valid_json() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_term_and_vote(5, Some(&voter("b"))).unwrap();

        let contents = fs::read_to_string(dir.path().join("meta.json")).unwrap();
        let _: serde_json::Value = serde_json::from_str(&contents).expect("valid JSON");
    }

    #[test]
    fn log_file_is_valid_json() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_log(&[LogEntry::new(1, b"cmd".to_vec())]).unwrap();

        let contents = fs::read_to_string(dir.path().join("log.json")).unwrap();
        let _: serde_json::Value = serde_json::from_str(&contents).expect("valid JSON");
    }

    #[test]
    fn no_temp_files_remain() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_term_and_vote(5, Some(&voter("b"))).unwrap();
        storage.save_log(&[LogEntry::new(1, b"cmd".to_vec())]).unwrap();

        assert!(!dir.path().join("meta.tmp").exists());
        assert!(!dir.path().join("log.tmp").exists());
    }
}

// =============================================================================
// SECTION 5: EDGE CASES
// =============================================================================

mod edge_cases {
    use super::*;

    #[test]
    fn large_log_entry() {
        let mut storage = InMemoryStorage::new();

        // 1MB command
        let large_command = vec![0u8; 1024 * 1024];
        storage
            .save_log(&[LogEntry::new(1, large_command)])
            .unwrap();

        let log = storage.load_log().unwrap();
        assert_eq!(log[0].command.len(), 1024 * 1024);
    }

    #[test]
    fn many_log_entries() {
        let mut storage = InMemoryStorage::new();

        let log: Vec<LogEntry> = (1..=1000)
            .map(|i| LogEntry::new(1, format!("cmd{}", i).into_bytes()))
            .collect();
        storage.save_log(&log).unwrap();

        assert_eq!(storage.load_log().unwrap().len(), 1000);
    }

    #[test]
    fn binary_command_data() {
        let mut storage = InMemoryStorage::new();

        let binary_data = vec![0x00, 0xFF, 0x7F, 0x80, 0xFE];
        storage
            .save_log(&[LogEntry::new(1, binary_data.clone())])
            .unwrap();

        assert_eq!(storage.load_log().unwrap()[0].command, binary_data);
    }

    #[test]
    fn unicode_in_command() {
        let mut storage = InMemoryStorage::new();

        let unicode_cmd = "SET 键 值 🎉".as_bytes().to_vec();
        storage
            .save_log(&[LogEntry::new(1, unicode_cmd.clone())])
            .unwrap();

        assert_eq!(storage.load_log().unwrap()[0].command, unicode_cmd);
    }

    #[test]
    fn very_high_term_number() {
        let mut storage = InMemoryStorage::new();

        storage.save_term_and_vote(u64::MAX, None).unwrap();
        let (term, _) = storage.load_term_and_vote().unwrap();

        assert_eq!(term, u64::MAX);
    }

    #[test]
    fn peer_id_with_unusual_address_round_trips() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        let voted = PeerId::new("[::1]:7000", "node/with/slashes");
        storage.save_term_and_vote(3, Some(&voted)).unwrap();

        let (_, voted_for) = storage.load_term_and_vote().unwrap();
        assert_eq!(voted_for, Some(voted));
    }
}

// =============================================================================
// SECTION 6: STORAGE TRAIT POLYMORPHISM
// =============================================================================

mod trait_polymorphism {
    use super::*;

    fn exercise_storage<S: Storage>(storage: &mut S) {
        let voted = voter("b");
        storage.save_term_and_vote(5, Some(&voted)).unwrap();
        let (term, voted_for) = storage.load_term_and_vote().unwrap();
        assert_eq!(term, 5);
        assert_eq!(voted_for, Some(voted));

        storage.save_log(&[LogEntry::new(1, b"cmd".to_vec())]).unwrap();
        assert_eq!(storage.load_log().unwrap().len(), 1);

        storage.save_log(&[]).unwrap();
        assert!(storage.load_log().unwrap().is_empty());

        storage.clear().unwrap();
        let (term, _) = storage.load_term_and_vote().unwrap();
        assert_eq!(term, 0);
    }

    #[test]
    fn in_memory_implements_trait() {
        let mut storage = InMemoryStorage::new();
        exercise_storage(&mut storage);
    }

    #[test]
    fn file_storage_implements_trait() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        exercise_storage(&mut storage);
    }
}

//! Main test module for replayvc
//!
//! This module includes all test suites:
//! - Integration tests for full migrations against in-memory repositories
//! - Property-based tests for invariants
//! - Edge cases around persisted files

pub mod support;
pub mod integration;

#[cfg(test)]
mod edge_cases {
    use ::replayvc::checkpoint::{CheckpointManager, STATE_FILE};
    use ::replayvc::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(temp: &TempDir) -> MigrationConfig {
        MigrationConfigBuilder::new()
            .source(RepositoryCoordinates::new("https://old", "$/Old", temp.path().join("src")))
            .target(RepositoryCoordinates::new("https://new", "$/New", temp.path().join("dst")))
            .branch_creating([42])
            .checkpoint_dir(temp.path().join("state"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_tampered_checkpoint_is_rejected() {
        let temp = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp.path());
        manager.save(&MigrationState::new("m", Some(5), vec![6, 7])).unwrap();

        let path = temp.path().join(STATE_FILE);
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, text.replace("\"last_processed_revision\": 5", "\"last_processed_revision\": 6")).unwrap();

        match manager.load() {
            Err(ReplayError::CheckpointCorrupted(_)) => {}
            other => panic!("expected a corrupted checkpoint, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_checkpoint_is_rejected() {
        let temp = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp.path());
        fs::write(temp.path().join(STATE_FILE), "{\"format_version\": 1, ").unwrap();
        assert!(matches!(manager.load(), Err(ReplayError::CheckpointCorrupted(_))));
    }

    #[test]
    fn test_missing_checkpoint_is_reported() {
        let temp = TempDir::new().unwrap();
        let manager = CheckpointManager::new(temp.path().join("nowhere"));
        assert!(!manager.exists());
        assert!(matches!(manager.load(), Err(ReplayError::CheckpointNotFound(_))));
    }

    #[test]
    fn test_utf16_history_export() {
        let temp = TempDir::new().unwrap();
        let text = "Changeset: 7\nUser: Ann\n\nChangeset: 3\nUser: Bob\n";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let path = temp.path().join("history.txt");
        fs::write(&path, bytes).unwrap();

        let decoded = history::read_history_file(&path).unwrap();
        assert_eq!(history::parse_history(&decoded), vec![3, 7]);
    }

    #[test]
    fn test_configuration_round_trip() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let path = temp.path().join("replayvc.json");
        config.save(&path).unwrap();

        let loaded = MigrationConfig::load(&path).unwrap();
        assert_eq!(loaded.source, config.source);
        assert_eq!(loaded.branch_creating, config.branch_creating);
        assert_eq!(loaded.commit_attempts, 3);
        assert_eq!(loaded.state_path(), temp.path().join("state").join(STATE_FILE));
    }

    #[test]
    fn test_minimal_configuration_gets_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("replayvc.json");
        fs::write(
            &path,
            r#"{
                "source": { "collection": "https://old", "root": "$/Old", "local_path": "src" },
                "target": { "collection": "https://new", "root": "$/New", "local_path": "dst" },
                "branch_creating": [11]
            }"#,
        )
        .unwrap();

        let config = MigrationConfig::load(&path).unwrap();
        assert_eq!(config.tool, "tf");
        assert_eq!(config.verification.id_match_threshold, 87.0);
        assert!(config.persist_progress);
        let classifier = RevisionClassifier::from_config(&config);
        assert_eq!(classifier.classify(11), RevisionClass::BranchCreating);
        assert_eq!(classifier.classify(12), RevisionClass::Regular);
    }

    #[test]
    fn test_shared_working_copy_is_rejected() {
        let temp = TempDir::new().unwrap();
        let result = MigrationConfigBuilder::new()
            .source(RepositoryCoordinates::new("https://old", "$/Old", temp.path()))
            .target(RepositoryCoordinates::new("https://new", "$/New", temp.path()))
            .build();
        assert!(matches!(result, Err(ReplayError::InvalidConfiguration(_))));
    }
}

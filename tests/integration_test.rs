#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use package_io::{
        init_from_config, init_package_io, term_package_io, Config,
        DeviceSettings, FileSystemFlags, IoHeuristics, MemoryPackageStore,
        OpenMode, OsFileSystem, PackageIoError, SchedulerType, StreamManager,
        StreamMgr, TransferInfo, DEVICE_NAME,
    };
    use tempdir::TempDir;

    fn deterministic_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn read(
        manager: &StreamMgr,
        desc: &package_io::FileDescriptor,
        position: u64,
        len: u32,
    ) -> Result<Vec<u8>, PackageIoError> {
        let mut buf = vec![0u8; len as usize];
        manager.read(
            desc,
            &IoHeuristics::default(),
            &mut buf,
            &TransferInfo::new(position, len),
        )?;
        Ok(buf)
    }

    #[test_log::test]
    fn package_file_lifecycle() {
        let manager = Arc::new(StreamMgr::default());
        let store = MemoryPackageStore::new();
        store.insert(42, deterministic_bytes(100));

        let io = init_package_io(
            manager.clone(),
            Arc::new(store),
            Arc::new(OsFileSystem::new()),
            &DeviceSettings::default(),
        )
        .expect("Failed to initialize device");
        let device_id = io.device_id().expect("Device should be registered");

        let desc = manager
            .open_by_id(42, OpenMode::Read, None)
            .expect("Failed to open package file");
        assert_eq!(desc.size, 100);
        assert!(desc.handle.is_package());
        assert_eq!(desc.device_id, device_id);

        let tail = read(&manager, &desc, 50, 50).unwrap();
        assert_eq!(tail, deterministic_bytes(100)[50..]);

        assert!(matches!(
            read(&manager, &desc, 90, 20),
            Err(PackageIoError::OutOfBounds { .. })
        ));

        manager.close(&desc).expect("Failed to close package file");
        assert!(matches!(
            read(&manager, &desc, 0, 1),
            Err(PackageIoError::InvalidHandle(_))
        ));

        let device = manager.device_desc(device_id).unwrap();
        assert_eq!(device.name, DEVICE_NAME);
        assert!(device.can_read && !device.can_write);

        term_package_io(&io);
        assert_eq!(manager.device_count(), 0);
        assert!(manager.path_resolver().is_none());
    }

    #[test_log::test]
    fn non_blocking_device_is_rejected() {
        let manager = Arc::new(StreamMgr::default());
        let settings = DeviceSettings {
            scheduler_type: SchedulerType::DeferredLinedUp,
            ..Default::default()
        };

        let result = init_package_io(
            manager.clone(),
            Arc::new(MemoryPackageStore::new()),
            Arc::new(OsFileSystem::new()),
            &settings,
        );
        assert!(matches!(result, Err(PackageIoError::Configuration(_))));
        assert_eq!(manager.device_count(), 0);
        assert!(manager.path_resolver().is_none());
    }

    #[test_log::test]
    fn device_from_config_file() {
        let root = TempDir::new("package_io_config")
            .expect("Failed to create temporary directory");
        let audio = root.path().join("audio");
        let packages = root.path().join("packages");
        fs::create_dir_all(&audio).unwrap();
        fs::create_dir_all(packages.join("music")).unwrap();
        fs::write(audio.join("Init.bnk"), b"BKHD init bank").unwrap();
        fs::write(packages.join("music").join("0x00000100.wem"), [1u8; 64])
            .unwrap();

        let config_path = root.path().join("package-io.json");
        let config = serde_json::json!({
            "device": { "scheduler_type": "blocking" },
            "base_paths": [audio],
            "package_root": packages,
        });
        fs::write(&config_path, config.to_string()).unwrap();

        let config = Config::load(&config_path).expect("Failed to load config");
        let (manager, io) =
            init_from_config(&config).expect("Failed to initialize device");

        let bank = manager
            .open_by_path(
                "Init.bnk",
                OpenMode::Read,
                Some(&FileSystemFlags {
                    cache_id: 0x1234,
                    ..Default::default()
                }),
            )
            .expect("Failed to open bank");
        assert!(!bank.handle.is_package());
        assert_eq!(read(&manager, &bank, 0, 4).unwrap(), b"BKHD");
        assert_eq!(manager.block_size(&bank).unwrap(), 1);
        manager.close(&bank).unwrap();

        let music = manager
            .open_by_id(0x100, OpenMode::Read, None)
            .expect("Failed to open streamed file");
        assert_eq!(music.size, 64);
        assert_eq!(read(&manager, &music, 60, 4).unwrap(), [1u8; 4]);

        assert!(matches!(
            manager.open_by_id(0x101, OpenMode::Read, None),
            Err(PackageIoError::NotFound(0x101))
        ));

        // Closing every handle before termination leaves nothing behind
        manager.close(&music).unwrap();
        assert_eq!(io.open_package_files(), 0);
        io.term();
        assert_eq!(manager.device_count(), 0);
    }
}

//! Linear schema migrations, numbered from 1.
//!
//! The current on-disk version is stored under the `schema_version`
//! settings key. On open, pending migrations run in order, each inside
//! its own transaction. A database whose version is newer than
//! `SCHEMA_VERSION` refuses to open.

/// Version the binary knows how to produce.
pub const SCHEMA_VERSION: i64 = 3;

/// Version stamped on photo rows when their descriptors are complete.
/// Bumped when descriptor extraction changes in a way that requires
/// re-processing already-indexed photos.
pub const INDEX_VERSION: i64 = 1;

pub const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
        -- Photos: one row per file on disk, identity = absolute path
        CREATE TABLE photos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            folder TEXT NOT NULL,
            filename TEXT NOT NULL,
            ext TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            created_at TEXT,
            modified_at TEXT,
            sha1 TEXT,
            perceptual_hash TEXT,
            indexed_at TEXT,
            index_version INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_photos_folder ON photos(folder);
        CREATE INDEX idx_photos_sha1 ON photos(sha1);
        CREATE INDEX idx_photos_modified ON photos(modified_at);

        -- EXIF: 1:1 with photos, optional
        CREATE TABLE exif (
            photo_id INTEGER PRIMARY KEY,
            shot_dt TEXT,
            camera_make TEXT,
            camera_model TEXT,
            lens TEXT,
            iso INTEGER,
            aperture REAL,
            shutter_speed TEXT,
            focal_length REAL,
            gps_latitude REAL,
            gps_longitude REAL,
            orientation INTEGER,
            FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_exif_shot_dt ON exif(shot_dt);

        -- Embeddings: float32 vector stored as little-endian bytes
        CREATE TABLE embeddings (
            photo_id INTEGER PRIMARY KEY,
            vector BLOB NOT NULL,
            dim INTEGER NOT NULL,
            model_name TEXT NOT NULL,
            processed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
        );

        -- Thumbnails: path relative to the thumbnail cache root
        CREATE TABLE thumbnails (
            photo_id INTEGER PRIMARY KEY,
            rel_path TEXT NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            format TEXT NOT NULL,
            generated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
        );

        -- Key/value settings; reserved keys: schema_version, index_version
        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    ),
    (
        2,
        r#"
        -- People: named face identities with an averaged embedding
        CREATE TABLE people (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            face_vector BLOB,
            sample_count INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Faces: detected faces with bounding box and embedding
        CREATE TABLE faces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            photo_id INTEGER NOT NULL,
            person_id INTEGER,
            x1 REAL NOT NULL,
            y1 REAL NOT NULL,
            x2 REAL NOT NULL,
            y2 REAL NOT NULL,
            vector BLOB,
            confidence REAL,
            verified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE,
            FOREIGN KEY (person_id) REFERENCES people(id) ON DELETE SET NULL
        );

        CREATE INDEX idx_faces_photo ON faces(photo_id);
        CREATE INDEX idx_faces_person ON faces(person_id);
        "#,
    ),
    (
        3,
        r#"
        -- Portable drives: stable device id -> friendly name + mount point
        CREATE TABLE drive_aliases (
            device_id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            last_mount_point TEXT,
            last_seen_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- User tags as a JSON array, written by batch tag jobs
        ALTER TABLE photos ADD COLUMN tags TEXT;
        "#,
    ),
];

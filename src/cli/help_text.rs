pub(super) const ROOT_LONG_ABOUT: &str = "\
Directory tree mirroring and verification against a manifest database

Mirror maintains a manifest of the regular files and directories under a
chosen root: one row per entry with its size, modification time, and an
8-octet content fingerprint. The manifest is a single SQLite file and can be
carried alongside the data it describes.

Three tools share one traversal engine:

  --tool=create-db
    Walk SOURCE and record every regular file and directory in the manifest.
    All rows are written in a single transaction; a failed walk leaves the
    manifest exactly as it was.

  --tool=verify-dir
    Walk SOURCE and compare it against the manifest. Differences are
    reported to the error stream: entries that changed (size, mtime,
    fingerprint, or type), entries the manifest does not know, and entries
    the manifest expects but the filesystem lacks.

  --tool=merge-dir
    Walk DEST and compare it against the manifest like verify-dir, then copy
    anything missing from DEST out of SOURCE. Files are copied with their
    modification time; nothing in DEST is ever overwritten or deleted.

TRAVERSAL:

Symbolic links are never followed, during the walk or during copies: every
directory below the root is opened relative to its parent with O_NOFOLLOW.
Entries that are neither regular files nor directories (device nodes,
FIFOs, sockets, symlinks) are skipped with a diagnostic. Entries that cannot
be read for lack of permission are skipped with a warning by default; pass
--strict-permissions to abort instead.

NAMES AND LOCALES:

The manifest stores names as UTF-8 regardless of the system locale. The
locale charset (from LC_ALL, LC_CTYPE, or LANG) is resolved once at startup;
on UTF-8 locales names pass through unchanged, on other locales they are
transcoded. A name that cannot round-trip through the locale charset aborts
the run.

EXIT CODES:

  0  success (differences found by verify-dir/merge-dir are diagnostics,
     not failures)
  1  fatal error: bad arguments, manifest open failure, I/O failure

EXAMPLES:

  # Record a tree
  $ mirror --tool=create-db --db=photos.db /data/photos

  # Check it later
  $ mirror --tool=verify-dir --db=photos.db /data/photos

  # Fill the gaps in a copy from the original
  $ mirror --tool=merge-dir --db=photos.db /data/photos /backup/photos
";

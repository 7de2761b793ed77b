pub(super) const ROOT_LONG_ABOUT: &str = "\
File state tracker with change detection and integrity proofs

Treeproof records a snapshot of a project's files (path, size, modification time and a
content hash) and tells you which files were added, modified or deleted since the last
recorded snapshot. It can also export a proof document that lets anyone later confirm
that a tree still matches the state it was proven in.

CORE CONCEPTS:

  Detectors:
    A detector is a named, independent baseline. Each detector keeps its state in
    .treeproof/<detector>.state.toml at the project root. Two detectors never see each
    other's state, so a CI job and a local workflow can track the same tree separately.

  Content hashes:
    Changes are decided by content hash only. Touching a file, or editing it and then
    restoring its content, is not a modification. By default CRLF line endings are
    normalized to LF before hashing, so checkouts on different platforms hash equally.

  Proofs:
    A proof lists every tracked file with its hash plus an aggregate hash over all of
    them. Verification compares a proof with the tree as it is now.

TYPICAL WORKFLOW:

  1. Record a baseline:
     $ treeproof update

  2. Make changes, then look at them:
     $ treeproof status

  3. Accept exactly the changes you reviewed:
     $ treeproof update --fingerprint <FINGERPRINT>

  4. Publish a proof and check it later:
     $ treeproof prove --output release.proof.toml
     $ treeproof verify release.proof.toml

CONFIGURATION:

  Settings are read from .treeproof/config.toml if it exists, or from the file given
  with --config:

    detector_id = \"default\"
    hash_algorithm = \"sha256\"        # or \"sha512\"
    normalize_line_endings = true
    watch_patterns = []              # empty means everything
    ignore_patterns = [\".git\", \"node_modules\", \"target\"]
    max_parallelism = 0              # 0 picks a value from the CPU count

GLOBAL OPTIONS:

  -C <DIRECTORY>
    Change to directory before operating (like git -C or make -C). Relative paths given
    to other options are resolved from there.

  -v, --verbose / --log-level <LEVEL>
    Control logging on stderr. Both take precedence over RUST_LOG.

EXIT CODES:

  0    Success, nothing changed, or the proof verified
  1    status found changes, or verify found discrepancies
  2    verify could not compare (unreadable or incompatible proof)
  255  Any other error

For detailed help on each command:
  treeproof status --help
  treeproof update --help
  treeproof prove --help
  treeproof verify --help
";

pub(super) const STATUS_LONG_ABOUT: &str = "\
Show files added, modified or deleted since the last update

Hashes every tracked file and compares the result with the detector's stored state.
Nothing is written. Each change is printed on its own line:

  A  path    added since the last update
  M  path    content hash differs
  D  path    deleted since the last update

If there are changes, a fingerprint line follows. Pass it to 'treeproof update
--fingerprint' to record exactly the changes shown.

Without stored state (first run, or state written by an incompatible configuration)
every file is reported as added.

OPTIONS:

  --diff
    Show previous and current size, modification time and hash below modified and
    deleted files.

EXIT CODES:

  0    No changes
  1    Changes found
  255  Error
";

pub(super) const UPDATE_LONG_ABOUT: &str = "\
Record the current state as the baseline for the next status

Hashes every tracked file, prints the changes against the stored state and saves the
new snapshot for the detector. The save is atomic: readers see either the old or the
new state file, never a partial one. Only one update per detector can run at a time.

FINGERPRINT VALIDATION (--fingerprint):

  1. Run 'treeproof status' to review changes and get a fingerprint
  2. Run 'treeproof update --fingerprint <FINGERPRINT>'

If anything changed in between, the fingerprint won't match and nothing is written.

  $ FP=$(treeproof status | grep '^Fingerprint:' | cut -d' ' -f2)
  $ treeproof update --fingerprint $FP

DRY RUN (--dry-run):

Prints the changes an update would record without writing any state.

If the new state cannot be saved, the changes are still printed and the command exits
with 255. The next run will report the same changes again.
";

pub(super) const PROVE_LONG_ABOUT: &str = "\
Write a proof document describing the current state

Hashes every tracked file and writes a TOML proof containing the detector id, a
timestamp, a project label, the hash configuration, every file's relative path, size,
modification time and hash, and an aggregate hash over all file hashes.

Proofs hold relative paths only, so a proof generated on one machine can be verified on
a checkout somewhere else.

  $ treeproof prove --output release.proof.toml --label my-project
  $ treeproof prove > release.proof.toml
";

pub(super) const VERIFY_LONG_ABOUT: &str = "\
Check the current state against a proof document

Hashes the tree using the hash algorithm, line ending setting and file patterns
recorded in the proof, then compares. If the aggregate hash matches, the tree is
verified without looking at individual files. Otherwise each difference is listed:

  missing   path    in the proof, no longer present
  modified  path    present with a different hash
  added     path    present, but not in the proof

EXIT CODES:

  0    Verified
  1    Discrepancies found
  2    Cannot verify: proof unreadable, internally inconsistent, or of an unsupported
       version or algorithm
  255  Other error
";

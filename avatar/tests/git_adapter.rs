//! Version-control adapter against real git repositories.

use avatar::io::git::{Git, GitResultExt, VcsErrorKind, VcsOutcome};
use avatar::test_support::{RecordingRunner, TestRepo, git, test_identity};

fn adapter() -> Git<RecordingRunner> {
    Git::new(RecordingRunner::new()).with_identity(test_identity())
}

#[test]
fn clone_twice_runs_clone_once() {
    let repo = TestRepo::new().expect("repo");
    let target = repo.path().join("workspace/repos/1");
    let git = adapter();

    assert_eq!(git.clone_repo(&repo.remote_url(), &target), Ok(VcsOutcome::Cloned));
    assert_eq!(
        git.clone_repo(&repo.remote_url(), &target),
        Ok(VcsOutcome::AlreadyCloned)
    );
    assert_eq!(git.runner().count_with_arg("clone"), 1);
    assert!(target.join("README.md").exists());
}

#[test]
fn clone_of_missing_remote_is_a_clone_error() {
    let repo = TestRepo::new().expect("repo");
    let result = adapter().clone_repo(
        &repo.path().join("missing.git").to_string_lossy(),
        &repo.path().join("target"),
    );
    let err = result.clone().expect_err("clone should fail");
    assert_eq!(err.kind, VcsErrorKind::Clone);
    assert!(!result.is_success());
    assert!(!result.diagnostic().is_empty());
}

#[test]
fn checkout_creates_then_switches() {
    let repo = TestRepo::new().expect("repo");
    let target = repo.path().join("clone");
    let git = adapter();
    git.clone_repo(&repo.remote_url(), &target).expect("clone");

    assert_eq!(
        git.checkout_or_create(&target, "feature/x"),
        Ok(VcsOutcome::CreatedBranch)
    );
    assert_eq!(git.current_branch(&target).as_deref(), Some("feature/x"));
    assert_eq!(git.checkout_or_create(&target, "main"), Ok(VcsOutcome::SwitchedBranch));
    assert_eq!(
        git.checkout_or_create(&target, "feature/x"),
        Ok(VcsOutcome::SwitchedBranch)
    );
}

/// A branch that exists only on the remote is checked out from it.
#[test]
fn checkout_tracks_remote_only_branch() {
    let repo = TestRepo::new().expect("repo");
    let git = adapter();
    let first = repo.path().join("first");
    git.clone_repo(&repo.remote_url(), &first).expect("clone");
    git.checkout_or_create(&first, "shared").expect("create");
    std::fs::write(first.join("shared.txt"), "from first\n").expect("write");
    git.commit(&first, "add shared", None).expect("commit");
    git.push(&first, "shared").expect("push");

    let second = repo.path().join("second");
    git.clone_repo(&repo.remote_url(), &second).expect("clone");
    git.checkout_or_create(&second, "shared").expect("checkout");
    assert_eq!(
        std::fs::read_to_string(second.join("shared.txt")).expect("read"),
        "from first\n"
    );
}

#[test]
fn commit_on_clean_tree_is_a_no_op_success() {
    let repo = TestRepo::new().expect("repo");
    let target = repo.path().join("clone");
    let git = adapter();
    git.clone_repo(&repo.remote_url(), &target).expect("clone");

    let result = git.commit(&target, "nothing here", None);
    assert_eq!(result, Ok(VcsOutcome::NoOpCommit));
    assert!(result.is_success());
}

#[test]
fn commit_stages_only_listed_files() {
    let repo = TestRepo::new().expect("repo");
    let target = repo.path().join("clone");
    let git = adapter();
    git.clone_repo(&repo.remote_url(), &target).expect("clone");
    std::fs::write(target.join("wanted.txt"), "yes\n").expect("write");
    std::fs::write(target.join("stray.txt"), "no\n").expect("write");

    let files = vec!["wanted.txt".to_string()];
    assert_eq!(
        git.commit(&target, "add wanted", Some(files.as_slice())),
        Ok(VcsOutcome::Committed)
    );
    let tracked = avatar::test_support::git(&target, &["ls-files"]).expect("ls-files");
    assert!(tracked.lines().any(|line| line == "wanted.txt"));
    assert!(!tracked.lines().any(|line| line == "stray.txt"));
}

#[test]
fn push_without_remote_skips_network() {
    let temp = tempfile::tempdir().expect("tempdir");
    git(temp.path(), &["init"]).expect("init");
    let git = adapter();

    let result = git.push(temp.path(), "main");
    assert_eq!(result, Ok(VcsOutcome::NoRemote));
    assert_eq!(git.runner().count_with_arg("push"), 0);
}

#[test]
fn push_publishes_branch_to_origin() {
    let repo = TestRepo::new().expect("repo");
    let target = repo.path().join("clone");
    let git = adapter();
    git.clone_repo(&repo.remote_url(), &target).expect("clone");
    git.checkout_or_create(&target, "feature/y").expect("checkout");
    std::fs::write(target.join("y.txt"), "y\n").expect("write");
    git.commit(&target, "add y", None).expect("commit");

    assert_eq!(
        git.push(&target, "feature/y"),
        Ok(VcsOutcome::Pushed {
            remote: "origin".to_string()
        })
    );
    assert!(repo.remote_has_branch("feature/y"));
    assert_eq!(repo.remote_subject("feature/y").expect("subject"), "add y");
}

/// Abandoned generated files are removed and tracked edits rolled back,
/// while unrelated untracked files stay.
#[test]
fn discard_restores_tracked_and_removes_written() {
    let repo = TestRepo::new().expect("repo");
    let target = repo.path().join("clone");
    let git = adapter();
    git.clone_repo(&repo.remote_url(), &target).expect("clone");
    let original = std::fs::read_to_string(target.join("README.md")).expect("read");
    std::fs::write(target.join("README.md"), "overwritten\n").expect("write");
    std::fs::create_dir_all(target.join("pkg")).expect("mkdir");
    std::fs::write(target.join("pkg/app.py"), "print('hi')\n").expect("write");
    std::fs::write(target.join("notes.txt"), "keep\n").expect("write");
    avatar::test_support::git(&target, &["add", "README.md"]).expect("stage");

    let written = vec!["README.md".to_string(), "pkg/app.py".to_string()];
    assert_eq!(
        git.discard_changes(&target, &written),
        Ok(VcsOutcome::Discarded)
    );
    assert_eq!(
        std::fs::read_to_string(target.join("README.md")).expect("read"),
        original
    );
    assert!(!target.join("pkg/app.py").exists());
    assert!(target.join("notes.txt").exists());
    let status = avatar::test_support::git(&target, &["status", "--porcelain"]).expect("status");
    assert_eq!(status.trim(), "?? notes.txt");
}

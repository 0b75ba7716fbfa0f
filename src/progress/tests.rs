use super::*;

#[test]
fn status_callback_updates_message() {
    let spinner = Spinner::hidden();
    let status = spinner.status_fn();

    status("embedding [1/2] docs/a.md");
    assert_eq!(spinner.message(), "embedding [1/2] docs/a.md");

    status("search knn (topK=10)");
    assert_eq!(spinner.message(), "search knn (topK=10)");
}

#[test]
fn suspend_returns_closure_value() {
    let spinner = Spinner::hidden();
    assert_eq!(spinner.suspend(|| 42), 42);
    spinner.clear();
}

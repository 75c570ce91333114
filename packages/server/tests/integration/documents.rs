use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::storage::BlobStore;
use common::storage::filesystem::FilesystemBlobStore;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde_json::json;

use crate::common::{FlakyBlobStore, SigningBlobStore, TestApp, routes};

mod upload {
    use super::*;

    #[tokio::test]
    async fn owner_can_upload_and_metadata_is_echoed() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let alice_id = app.user_id(&token).await;

        let part = Part::bytes(b"quarterly numbers".to_vec())
            .file_name("report.txt")
            .mime_str("text/plain")
            .unwrap();
        let form = Form::new()
            .part("file", part)
            .text("title", "Q3 report")
            .text("description", "Numbers for the third quarter");
        let res = app
            .send_multipart(Method::POST, routes::DOCUMENTS, form, &token)
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert!(res.body["id"].is_number());
        assert_eq!(res.body["owner_id"], alice_id);
        assert_eq!(res.body["filename"], "report.txt");
        assert_eq!(res.body["size"], 17);
        assert_eq!(res.body["content_type"], "text/plain");
        assert_eq!(res.body["title"], "Q3 report");
        assert_eq!(res.body["description"], "Numbers for the third quarter");
        assert!(res.body["created_at"].is_string());
        assert!(res.body.get("storage_key").is_none());
        assert!(!res.text.contains(app.storage_key(res.id()).await.as_str()));
        assert_eq!(app.blob_count().await, 1);
    }

    #[tokio::test]
    async fn generic_content_type_is_inferred_from_the_extension() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;

        let res = app
            .upload_with_token(
                "scan.pdf",
                "application/octet-stream",
                b"%PDF-1.7".to_vec(),
                &token,
            )
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["content_type"], "application/pdf");
    }

    #[tokio::test]
    async fn upload_requires_authentication() {
        let app = TestApp::spawn().await;

        let part = Part::bytes(b"hello".to_vec()).file_name("a.txt");
        let res = app
            .client
            .post(app.url(routes::DOCUMENTS))
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .unwrap();

        assert_eq!(res.status().as_u16(), 401);
        assert_eq!(app.blob_count().await, 0);
    }

    #[tokio::test]
    async fn form_without_a_file_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;

        let res = app
            .send_multipart(
                Method::POST,
                routes::DOCUMENTS,
                Form::new().text("title", "nothing attached"),
                &token,
            )
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn path_like_filenames_are_rejected() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;

        for name in ["../etc/passwd", "dir/file.txt", ".hidden"] {
            let res = app
                .upload_with_token(name, "text/plain", b"x".to_vec(), &token)
                .await;
            assert_eq!(res.status, 400, "{name} should be rejected: {}", res.text);
            assert_eq!(res.body["code"], "VALIDATION_ERROR");
        }
        assert_eq!(app.blob_count().await, 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_leaves_no_blob() {
        let app = TestApp::builder().max_upload_size(1024).spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;

        let res = app
            .upload_with_token("big.bin", "application/octet-stream", vec![7u8; 1025], &token)
            .await;

        assert_eq!(res.status, 413, "{}", res.text);
        assert_eq!(res.body["code"], "PAYLOAD_TOO_LARGE");
        assert_eq!(app.blob_count().await, 0);

        let list = app.get_with_token(routes::DOCUMENTS, &token).await;
        assert_eq!(list.body["pagination"]["total"], 0);
    }

    #[tokio::test]
    async fn upload_at_exactly_the_limit_is_accepted() {
        let app = TestApp::builder().max_upload_size(1024).spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;

        let res = app
            .upload_with_token("edge.bin", "application/octet-stream", vec![7u8; 1024], &token)
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["size"], 1024);
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected() {
        let app = TestApp::builder()
            .allowed_extensions(&["pdf", "txt"])
            .spawn()
            .await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;

        let res = app
            .upload_with_token("run.exe", "application/octet-stream", b"MZ".to_vec(), &token)
            .await;
        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");

        let res = app
            .upload_with_token("NOTES.TXT", "text/plain", b"ok".to_vec(), &token)
            .await;
        assert_eq!(res.status, 201, "{}", res.text);
    }

    #[tokio::test]
    async fn same_filename_twice_makes_two_documents() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;

        let first = app.create_document(&token, "notes.txt", "one").await;
        let second = app.create_document(&token, "notes.txt", "two").await;

        assert_ne!(first, second);
        assert_ne!(app.storage_key(first).await, app.storage_key(second).await);
        assert_eq!(app.blob_count().await, 2);
    }
}

mod access {
    use super::*;

    #[tokio::test]
    async fn owner_sees_only_their_own_documents() {
        let app = TestApp::spawn().await;
        let alice = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let bob = app
            .create_authenticated_user("bob@example.com", "securepass")
            .await;

        app.create_document(&alice, "a1.txt", "alice one").await;
        app.create_document(&alice, "a2.txt", "alice two").await;
        app.create_document(&bob, "b1.txt", "bob one").await;

        let res = app.get_with_token(routes::DOCUMENTS, &alice).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["pagination"]["total"], 2);
        let names: Vec<&str> = res.body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["filename"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a1.txt", "a2.txt"]);
    }

    #[tokio::test]
    async fn list_is_paginated() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        for i in 0..3 {
            app.create_document(&token, &format!("doc{i}.txt"), "x").await;
        }

        let res = app
            .get_with_token(&format!("{}?page=2&per_page=2", routes::DOCUMENTS), &token)
            .await;

        assert_eq!(res.status, 200);
        assert_eq!(res.body["data"].as_array().unwrap().len(), 1);
        assert_eq!(res.body["data"][0]["filename"], "doc2.txt");
        assert_eq!(res.body["pagination"]["total"], 3);
        assert_eq!(res.body["pagination"]["total_pages"], 2);
    }

    #[tokio::test]
    async fn huge_page_number_returns_an_empty_page() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        app.create_document(&token, "doc.txt", "x").await;

        let res = app
            .get_with_token(
                &format!("{}?page={}&per_page=100", routes::DOCUMENTS, u64::MAX),
                &token,
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert!(res.body["data"].as_array().unwrap().is_empty());
        assert_eq!(res.body["pagination"]["total"], 1);
    }

    #[tokio::test]
    async fn other_users_documents_look_nonexistent() {
        let app = TestApp::spawn().await;
        let alice = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let bob = app
            .create_authenticated_user("bob@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&alice, "secret.txt", "for alice").await;

        let missing = app.get_with_token(&routes::document(999_999), &bob).await;
        let foreign = app.get_with_token(&routes::document(doc_id), &bob).await;
        assert_eq!(foreign.status, 404);
        assert_eq!(foreign.body, missing.body);

        let res = app
            .get_with_token(&routes::document_content(doc_id), &bob)
            .await;
        assert_eq!(res.status, 404);

        let res = app
            .patch_with_token(&routes::document(doc_id), &json!({"title": "mine"}), &bob)
            .await;
        assert_eq!(res.status, 404);

        let res = app.delete_with_token(&routes::document(doc_id), &bob).await;
        assert_eq!(res.status, 404);

        // Untouched for the owner.
        let res = app.get_with_token(&routes::document(doc_id), &alice).await;
        assert_eq!(res.status, 200);
        assert!(res.body["title"].is_null());
        assert_eq!(app.blob_count().await, 1);
    }

    #[tokio::test]
    async fn admin_can_read_any_document() {
        let app = TestApp::spawn().await;
        let alice = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let admin = app.admin_token().await;
        let doc_id = app.create_document(&alice, "memo.txt", "alice memo").await;

        let res = app.get_with_token(&routes::document(doc_id), &admin).await;
        assert_eq!(res.status, 200);

        let res = app
            .get_with_token(&routes::document_content(doc_id), &admin)
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(res.text, "alice memo");
    }
}

mod download {
    use super::*;

    #[tokio::test]
    async fn content_is_streamed_with_original_name_and_type() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&token, "hello world.txt", "hi there").await;

        let res = app
            .get_with_token(&routes::document_content(doc_id), &token)
            .await;

        assert_eq!(res.status, 200);
        assert_eq!(res.bytes, b"hi there");
        assert_eq!(res.header("content-type"), Some("text/plain"));
        assert_eq!(res.header("content-length"), Some("8"));
        assert_eq!(res.header("cache-control"), Some("private, no-store"));
        let disposition = res.header("content-disposition").unwrap();
        assert!(disposition.starts_with("attachment;"));
        assert!(disposition.contains("filename*=UTF-8''hello%20world.txt"));
    }

    #[tokio::test]
    async fn filesystem_backend_serves_and_removes_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("blobs");
        let store = FilesystemBlobStore::new(base.clone(), 64 * 1024)
            .await
            .unwrap();
        let app = TestApp::builder()
            .blob_store(move |_| Arc::new(store))
            .spawn()
            .await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;

        let doc_id = app.create_document(&token, "notes.txt", "on disk").await;
        let key = app.storage_key(doc_id).await;
        let path = base.join(key.shard_prefix()).join(key.shard_suffix());
        assert!(path.exists());

        let res = app
            .get_with_token(&routes::document_content(doc_id), &token)
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(res.bytes, b"on disk");

        let res = app.delete_with_token(&routes::document(doc_id), &token).await;
        assert_eq!(res.status, 204);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn signing_backend_redirects_to_a_temporary_url() {
        let app = TestApp::builder()
            .blob_store(|inner| Arc::new(SigningBlobStore { inner }))
            .spawn()
            .await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&token, "memo.txt", "memo").await;
        let key = app.storage_key(doc_id).await;

        let res = app
            .get_with_token(&routes::document_content(doc_id), &token)
            .await;

        assert_eq!(res.status, 307);
        assert_eq!(
            res.header("location"),
            Some(format!("https://blobs.example/{key}?expires=300").as_str())
        );
    }

    #[tokio::test]
    async fn missing_blob_is_reported_as_not_found() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&token, "gone.txt", "gone").await;
        app.memory
            .delete(&app.storage_key(doc_id).await)
            .await
            .unwrap();

        let res = app
            .get_with_token(&routes::document_content(doc_id), &token)
            .await;

        assert_eq!(res.status, 404);
    }
}

mod update {
    use super::*;

    #[tokio::test]
    async fn metadata_can_be_set_and_cleared() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&token, "memo.txt", "memo").await;

        let res = app
            .patch_with_token(
                &routes::document(doc_id),
                &json!({"title": "Memo", "description": "An internal memo"}),
                &token,
            )
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["title"], "Memo");
        assert_eq!(res.body["description"], "An internal memo");

        let res = app
            .patch_with_token(&routes::document(doc_id), &json!({"title": null}), &token)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert!(res.body["title"].is_null());
        assert_eq!(res.body["description"], "An internal memo");
    }

    #[tokio::test]
    async fn overlong_title_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&token, "memo.txt", "memo").await;

        let res = app
            .patch_with_token(
                &routes::document(doc_id),
                &json!({"title": "t".repeat(257)}),
                &token,
            )
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn replacing_content_swaps_the_blob() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&token, "draft.txt", "first draft").await;
        let old_key = app.storage_key(doc_id).await;

        let part = Part::bytes(b"final version".to_vec())
            .file_name("final.txt")
            .mime_str("text/plain")
            .unwrap();
        let res = app
            .send_multipart(
                Method::PUT,
                &routes::document(doc_id),
                Form::new().part("file", part),
                &token,
            )
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.id(), doc_id);
        assert_eq!(res.body["filename"], "final.txt");
        assert_eq!(res.body["size"], 13);

        let new_key = app.storage_key(doc_id).await;
        assert_ne!(old_key, new_key);
        assert!(!app.memory.exists(&old_key).await.unwrap());
        assert_eq!(app.blob_count().await, 1);

        let res = app
            .get_with_token(&routes::document_content(doc_id), &token)
            .await;
        assert_eq!(res.text, "final version");
    }

    #[tokio::test]
    async fn oversized_replacement_keeps_the_original() {
        let app = TestApp::builder().max_upload_size(16).spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&token, "small.txt", "small").await;
        let key = app.storage_key(doc_id).await;

        let part = Part::bytes(vec![b'x'; 17]).file_name("big.txt");
        let res = app
            .send_multipart(
                Method::PUT,
                &routes::document(doc_id),
                Form::new().part("file", part),
                &token,
            )
            .await;

        assert_eq!(res.status, 413);
        assert_eq!(app.storage_key(doc_id).await, key);
        assert_eq!(app.blob_count().await, 1);
        let res = app
            .get_with_token(&routes::document_content(doc_id), &token)
            .await;
        assert_eq!(res.text, "small");
    }

    #[tokio::test]
    async fn admin_cannot_edit_someone_elses_document() {
        let app = TestApp::spawn().await;
        let alice = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let admin = app.admin_token().await;
        let doc_id = app.create_document(&alice, "memo.txt", "memo").await;

        let res = app
            .patch_with_token(&routes::document(doc_id), &json!({"title": "x"}), &admin)
            .await;

        assert_eq!(res.status, 404);
    }
}

mod delete {
    use super::*;

    #[tokio::test]
    async fn owner_delete_removes_row_and_blob() {
        let app = TestApp::spawn().await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&token, "memo.txt", "memo").await;

        let res = app.delete_with_token(&routes::document(doc_id), &token).await;
        assert_eq!(res.status, 204);
        assert_eq!(app.blob_count().await, 0);

        let res = app.get_with_token(&routes::document(doc_id), &token).await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn row_is_removed_even_when_the_blob_delete_fails() {
        let fail_deletes = Arc::new(AtomicBool::new(false));
        let flag = fail_deletes.clone();
        let app = TestApp::builder()
            .blob_store(move |inner| {
                Arc::new(FlakyBlobStore {
                    inner,
                    fail_deletes: flag,
                })
            })
            .spawn()
            .await;
        let token = app
            .create_authenticated_user("alice@example.com", "securepass")
            .await;
        let doc_id = app.create_document(&token, "memo.txt", "memo").await;

        fail_deletes.store(true, Ordering::SeqCst);
        let res = app.delete_with_token(&routes::document(doc_id), &token).await;

        assert_eq!(res.status, 204, "{}", res.text);
        let res = app.get_with_token(&routes::document(doc_id), &token).await;
        assert_eq!(res.status, 404);
    }
}

mod scenario {
    use super::*;

    #[tokio::test]
    async fn two_users_share_a_server_without_seeing_each_other() {
        let app = TestApp::spawn().await;
        let alice = app
            .create_authenticated_user("alice@example.com", "alicepass1")
            .await;
        let bob = app
            .create_authenticated_user("bob@example.com", "bobpass123")
            .await;
        let admin = app.admin_token().await;

        let alice_doc = app.create_document(&alice, "plan.txt", "alice's plan").await;
        let bob_doc = app.create_document(&bob, "plan.txt", "bob's plan").await;

        let res = app
            .get_with_token(&routes::document_content(alice_doc), &alice)
            .await;
        assert_eq!(res.text, "alice's plan");
        let res = app
            .get_with_token(&routes::document_content(bob_doc), &bob)
            .await;
        assert_eq!(res.text, "bob's plan");

        let res = app
            .get_with_token(&routes::document_content(bob_doc), &alice)
            .await;
        assert_eq!(res.status, 404);

        let res = app.get_with_token(routes::ADMIN_DOCUMENTS, &admin).await;
        assert_eq!(res.body["pagination"]["total"], 2);

        let res = app.delete_with_token(&routes::document(alice_doc), &alice).await;
        assert_eq!(res.status, 204);

        let res = app.get_with_token(routes::DOCUMENTS, &bob).await;
        assert_eq!(res.body["pagination"]["total"], 1);
        assert_eq!(app.blob_count().await, 1);
    }
}

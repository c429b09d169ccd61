// Copyright 2018-2024 the Deno authors. MIT license.

#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]

mod analyzer;
mod collections;
pub mod coverage;
mod graph;
pub mod import_map;
mod module_specifier;
mod resolver;
mod rewrite;
mod rt;
pub mod source;
mod text_encoding;

pub use analyzer::analyze_imports;
pub use analyzer::find_comments;
pub use analyzer::CommentRange;
pub use analyzer::DefaultModuleAnalyzer;
pub use analyzer::ImportLocation;
pub use analyzer::ModuleAnalyzer;
pub use deno_media_type::MediaType;
pub use graph::CircularImportError;
pub use graph::ContentSource;
pub use graph::FakeModule;
pub use graph::FetchContext;
pub use graph::ImportError;
pub use graph::LoadedModule;
pub use graph::ModuleArtifact;
pub use graph::ModuleResult;
pub use graph::OriginalModule;
pub use graph::ResolvedIdentity;
pub use module_specifier::resolve_import;
pub use module_specifier::short_name;
pub use module_specifier::ModuleSpecifier;
pub use module_specifier::SpecifierError;
pub use resolver::ForceRealMode;
pub use resolver::ImportMapSource;
pub use resolver::ImportResolver;
pub use resolver::ImportResolverOptions;
pub use resolver::ResolvedImport;
pub use rewrite::replace_imports;
pub use rt::BoxedFuture;
pub use rt::DefaultExecutor;
pub use rt::Executor;
pub use text_encoding::decode_source;
pub use text_encoding::strip_bom;

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use super::*;
  use coverage::CoverageOptions;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use source::registry::MemoryModuleRegistry;
  use source::MemoryLoader;
  use source::Source;

  type Sources<'a> = Vec<(&'a str, Source<&'a str>)>;

  fn setup(
    sources: Sources,
    options: ImportResolverOptions,
  ) -> (ImportResolver, Rc<MemoryLoader>, Rc<MemoryModuleRegistry>) {
    let loader = Rc::new(MemoryLoader::new(sources));
    let registry = Rc::new(MemoryModuleRegistry::default());
    let resolver = ImportResolver::new(
      ModuleSpecifier::parse("file:///a/").unwrap(),
      loader.clone(),
      registry.clone(),
      options,
    );
    (resolver, loader, registry)
  }

  fn module<'a>(specifier: &'a str, content: &'a str) -> (&'a str, Source<&'a str>) {
    (
      specifier,
      Source::Module {
        specifier,
        maybe_headers: None,
        content,
      },
    )
  }

  /// The content of every module in the order they were built, with the
  /// locators replaced by the url of the module they stand for.
  fn contents(registry: &MemoryModuleRegistry) -> Vec<(String, String)> {
    let locators = registry.locators();
    let mut urls = Vec::new();
    for locator in &locators {
      let artifact = registry.get(locator).unwrap();
      let mut url = artifact.identity.specifier.to_string();
      if !artifact.identity.allow_fakes {
        url.push_str("#real");
      }
      urls.push(url);
    }
    locators
      .iter()
      .zip(&urls)
      .map(|(locator, url)| {
        let mut content = registry.get(locator).unwrap().content.to_string();
        for (other_locator, other_url) in locators.iter().zip(&urls) {
          content = content.replace(other_locator.as_str(), other_url);
        }
        (url.clone(), content)
      })
      .collect()
  }

  #[tokio::test]
  async fn test_import_graph() {
    let (resolver, loader, registry) = setup(
      vec![
        module(
          "file:///a/test01.js",
          r#"import * as b from "./test02.js"; export { b };"#,
        ),
        module("file:///a/test02.js", r#"export const b = "b";"#),
      ],
      Default::default(),
    );
    let result = resolver.import("./test01.js").await.unwrap();
    let module = result.maybe_module().unwrap();
    assert_eq!(module.artifact.specifier.as_str(), "file:///a/test01.js");
    assert_eq!(module.artifact.media_type, MediaType::JavaScript);
    assert_eq!(
      contents(&registry),
      vec![
        (
          "file:///a/test02.js".to_string(),
          r#"export const b = "b";"#.to_string()
        ),
        (
          "file:///a/test01.js".to_string(),
          r#"import * as b from "file:///a/test02.js"; export { b };"#
            .to_string()
        ),
      ]
    );
    assert_eq!(
      loader.load_count(&ModuleSpecifier::parse("file:///a/test02.js").unwrap()),
      1
    );
  }

  #[tokio::test]
  async fn test_fake_replaces_content() {
    let (resolver, _, registry) = setup(
      vec![
        module(
          "file:///a/main.js",
          "import {replaced} from \"./replaced.js\";\nexport {replaced};",
        ),
        module("file:///a/replaced.js", "export const replaced = \"not replaced\";"),
      ],
      Default::default(),
    );
    resolver
      .register_fake_module("./replaced.js", "export const replaced = \"replaced\";")
      .unwrap();
    resolver.import("./main.js").await.unwrap();
    assert_eq!(
      contents(&registry),
      vec![
        (
          "file:///a/replaced.js".to_string(),
          "export const replaced = \"replaced\";".to_string()
        ),
        (
          "file:///a/main.js".to_string(),
          "import {replaced} from \"file:///a/replaced.js\";\nexport {replaced};"
            .to_string()
        ),
      ]
    );
  }

  #[tokio::test]
  async fn test_fake_from_original() {
    let (resolver, loader, registry) = setup(
      vec![module("file:///a/a.js", "export const a = 1;")],
      Default::default(),
    );
    let seen = Rc::new(RefCell::new(Vec::new()));
    resolver
      .register_fake_module(
        "./a.js",
        FakeModule::from_original({
          let seen = seen.clone();
          move |original| {
            seen.borrow_mut().push(original.clone());
            format!("{}\nexport const b = 2;", original.full_content)
          }
        }),
      )
      .unwrap();
    resolver.import("./a.js").await.unwrap();
    assert_eq!(
      seen.borrow().clone(),
      vec![OriginalModule {
        specifier: ModuleSpecifier::parse("file:///a/a.js").unwrap(),
        full_content: "export const a = 1;".into(),
      }]
    );
    assert_eq!(
      contents(&registry),
      vec![(
        "file:///a/a.js".to_string(),
        "export const a = 1;\nexport const b = 2;".to_string()
      )]
    );
    let specifier = ModuleSpecifier::parse("file:///a/a.js").unwrap();
    assert_eq!(loader.load_count(&specifier), 1);
  }

  #[tokio::test]
  async fn test_generated_fake_does_not_load_original() {
    let (resolver, loader, _) = setup(vec![], Default::default());
    resolver
      .register_fake_module(
        "./missing.js",
        FakeModule::generated(|| "export default 1;".to_string()),
      )
      .unwrap();
    let result = resolver.import("./missing.js").await.unwrap();
    assert_eq!(
      result.maybe_module().unwrap().artifact.content.as_ref(),
      "export default 1;"
    );
    let specifier = ModuleSpecifier::parse("file:///a/missing.js").unwrap();
    assert_eq!(loader.load_count(&specifier), 0);
  }

  #[tokio::test]
  async fn test_original_of_missing_module_is_empty() {
    let (resolver, _, _) = setup(vec![], Default::default());
    resolver
      .register_fake_module(
        "./missing.js",
        FakeModule::from_original(|original| {
          format!("export const length = {};", original.full_content.len())
        }),
      )
      .unwrap();
    let result = resolver.import("./missing.js").await.unwrap();
    assert_eq!(
      result.maybe_module().unwrap().artifact.content.as_ref(),
      "export const length = 0;"
    );
  }

  #[tokio::test]
  async fn test_circular_imports() {
    let (resolver, _, _) = setup(
      vec![
        module("file:///a/A.js", "import \"./B.js\";"),
        module("file:///a/B.js", "import \"./A.js\";"),
      ],
      Default::default(),
    );
    let err = resolver.import("./A.js").await.unwrap_err();
    assert!(matches!(err, ImportError::CircularImport(_)));
    assert_eq!(
      err.to_string(),
      concat!(
        "Circular imports are not supported:\n",
        "A.js -> B.js -> A.js\n",
        "Consider marking one of the following modules as real to break the cycle:\n",
        "  file:///a/A.js\n",
        "  file:///a/B.js",
      )
    );
  }

  #[tokio::test]
  async fn test_circular_imports_three_modules() {
    let (resolver, _, _) = setup(
      vec![
        module("file:///a/A.js", "import \"./B.js\";"),
        module("file:///a/B.js", "import \"./C.js\";"),
        module("file:///a/C.js", "import \"./A.js\";"),
      ],
      Default::default(),
    );
    let err = resolver.import("./A.js").await.unwrap_err();
    let ImportError::CircularImport(err) = err else {
      panic!("unexpected error: {:?}", err);
    };
    assert_eq!(
      err
        .path
        .iter()
        .map(|specifier| short_name(specifier))
        .collect::<Vec<_>>(),
      vec!["A.js", "B.js", "C.js", "A.js"]
    );
  }

  #[tokio::test]
  async fn test_self_import() {
    let (resolver, _, _) = setup(
      vec![module("file:///a/A.js", "import \"./A.js\";")],
      Default::default(),
    );
    let err = resolver.import("./A.js").await.unwrap_err();
    assert_eq!(
      err.to_string(),
      "Circular imports are not supported. \"file:///a/A.js\" imports itself."
    );
  }

  #[tokio::test]
  async fn test_diamond_is_not_circular() {
    let (resolver, loader, registry) = setup(
      vec![
        module("file:///a/A.js", "import \"./B.js\";\nimport \"./C.js\";"),
        module("file:///a/B.js", "import \"./D.js\";"),
        module("file:///a/C.js", "import \"./D.js\";"),
        module("file:///a/D.js", "export {};"),
      ],
      Default::default(),
    );
    resolver.import("./A.js").await.unwrap();
    assert_eq!(registry.len(), 4);
    let d = ModuleSpecifier::parse("file:///a/D.js").unwrap();
    assert_eq!(loader.load_count(&d), 1);
  }

  #[tokio::test]
  async fn test_redirect_chain() {
    let (resolver, _, registry) = setup(
      vec![
        module("file:///a/main.js", "import {c} from \"./a.js\";"),
        module("file:///a/c.js", "export const c = \"c\";"),
      ],
      Default::default(),
    );
    resolver.register_redirect_module("./a.js", "./b.js").unwrap();
    resolver.register_redirect_module("./b.js", "./c.js").unwrap();
    resolver.import("./main.js").await.unwrap();
    let locators = registry.locators();
    let redirected = registry.get(&locators[0]).unwrap();
    assert_eq!(redirected.identity.specifier.as_str(), "file:///a/a.js");
    assert_eq!(redirected.specifier.as_str(), "file:///a/c.js");
    assert_eq!(redirected.content.as_ref(), "export const c = \"c\";");
  }

  #[tokio::test]
  async fn test_import_map_bare_specifier() {
    let (resolver, _, registry) = setup(
      vec![
        module("file:///a/main.js", "import {real} from \"barespecifier\";"),
        module("file:///a/real.js", "export const real = 1;"),
      ],
      ImportResolverOptions {
        import_map: Some(ImportMapSource::Inline(json!({
          "imports": {
            "barespecifier": "./real.js",
          },
        }))),
        import_map_entries_real: false,
        ..Default::default()
      },
    );
    resolver.import("./main.js").await.unwrap();
    assert_eq!(
      contents(&registry),
      vec![
        (
          "file:///a/real.js".to_string(),
          "export const real = 1;".to_string()
        ),
        (
          "file:///a/main.js".to_string(),
          "import {real} from \"file:///a/real.js\";".to_string()
        ),
      ]
    );
  }

  #[tokio::test]
  async fn test_import_map_entries_real() {
    let (resolver, _, registry) = setup(
      vec![module("file:///a/main.js", "import {real} from \"barespecifier\";")],
      ImportResolverOptions {
        import_map: Some(ImportMapSource::Inline(json!({
          "imports": {
            "barespecifier": "./real.js",
          },
        }))),
        ..Default::default()
      },
    );
    resolver.import("./main.js").await.unwrap();
    assert_eq!(
      contents(&registry),
      vec![(
        "file:///a/main.js".to_string(),
        "import {real} from \"barespecifier\";".to_string()
      )]
    );
  }

  #[tokio::test]
  async fn test_unmapped_bare_specifier() {
    let (resolver, _, _) = setup(
      vec![module("file:///a/main.js", "import \"unmapped\";")],
      Default::default(),
    );
    let err = resolver.import("./main.js").await.unwrap_err();
    assert_eq!(
      err.to_string(),
      "Relative import path \"unmapped\" not prefixed with / or ./ or ../"
    );
  }

  #[tokio::test]
  async fn test_import_map_from_url() {
    let (resolver, loader, registry) = setup(
      vec![
        module(
          "file:///a/maps/import_map.json",
          r#"{ "imports": { "lib/": "./vendor/" } }"#,
        ),
        module("file:///a/main.js", "import \"lib/mod.js\";"),
        module("file:///a/maps/vendor/mod.js", "export {};"),
      ],
      ImportResolverOptions {
        import_map: Some(ImportMapSource::Url("./maps/import_map.json".to_string())),
        import_map_entries_real: false,
        ..Default::default()
      },
    );
    resolver.import("./main.js").await.unwrap();
    resolver.import("./main.js").await.unwrap();
    assert_eq!(
      contents(&registry)[1],
      (
        "file:///a/main.js".to_string(),
        "import \"file:///a/maps/vendor/mod.js\";".to_string()
      )
    );
    let map = ModuleSpecifier::parse("file:///a/maps/import_map.json").unwrap();
    assert_eq!(loader.load_count(&map), 1);
  }

  #[tokio::test]
  async fn test_import_map_load_failure() {
    let (resolver, _, _) = setup(
      vec![("file:///a/import_map.json", Source::Status(404))],
      ImportResolverOptions {
        import_map: Some(ImportMapSource::Url("./import_map.json".to_string())),
        ..Default::default()
      },
    );
    let err = resolver.import("./main.js").await.unwrap_err();
    assert_eq!(
      err.to_string(),
      "Failed install import map from \"file:///a/import_map.json\". The resource did not respond with an ok status code (404)."
    );
  }

  #[tokio::test]
  async fn test_content_type_from_headers() {
    let (resolver, _, _) = setup(
      vec![(
        "https://example.com/mod",
        Source::Module {
          specifier: "https://example.com/mod",
          maybe_headers: Some(vec![("Content-Type", "application/typescript")]),
          content: "export const a: string = \"a\";",
        },
      )],
      Default::default(),
    );
    let result = resolver.import("https://example.com/mod").await.unwrap();
    let artifact = &result.maybe_module().unwrap().artifact;
    assert_eq!(artifact.media_type, MediaType::TypeScript);
    assert_eq!(artifact.content_type, "application/typescript");
  }

  #[tokio::test]
  async fn test_content_type_from_extension() {
    let (resolver, _, _) = setup(
      vec![module("file:///a/mod.ts", "export {};")],
      Default::default(),
    );
    let result = resolver.import("./mod.ts").await.unwrap();
    assert_eq!(
      result.maybe_module().unwrap().artifact.content_type,
      "application/typescript"
    );
  }

  #[tokio::test]
  async fn test_data_url() {
    let (resolver, _, registry) = setup(
      vec![module(
        "file:///a/main.js",
        "import \"data:text/javascript,export default 1\";",
      )],
      Default::default(),
    );
    resolver.import("./main.js").await.unwrap();
    let locators = registry.locators();
    let data = registry.get(&locators[0]).unwrap();
    assert_eq!(data.content.as_ref(), "export default 1");
    assert_eq!(data.content_type, "text/javascript");
  }

  #[tokio::test]
  async fn test_http_status_error() {
    let (resolver, _, _) = setup(
      vec![
        module("file:///a/main.js", "import \"./gone.js\";"),
        ("file:///a/gone.js", Source::Status(404)),
      ],
      Default::default(),
    );
    let err = resolver.import("./main.js").await.unwrap_err();
    assert_eq!(
      err.to_string(),
      "Failed to import \"file:///a/gone.js\" from \"file:///a/main.js\". The resource did not respond with an ok status code (404)."
    );
  }

  #[tokio::test]
  async fn test_coverage_map() {
    let (resolver, _, registry) = setup(
      vec![
        module("file:///a/main.js", "import \"./dep.js\";\nconsole.log(1);"),
        module("file:///a/dep.js", "export {};"),
      ],
      ImportResolverOptions {
        coverage: Some(CoverageOptions::default()),
        ..Default::default()
      },
    );
    let added = Rc::new(RefCell::new(Vec::new()));
    resolver
      .on_coverage_map_entry_added({
        let added = added.clone();
        move |entry| added.borrow_mut().push(entry.original_url.clone())
      })
      .unwrap();
    let result = resolver.import("./main.js").await.unwrap();
    let map = resolver.coverage_map().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(
      added.borrow().clone(),
      vec!["file:///a/dep.js".to_string(), "file:///a/main.js".to_string()]
    );

    let entry = &map[result.locator()];
    assert_eq!(entry.original_url, "file:///a/main.js");
    let original = "import \"./dep.js\";\nconsole.log(1);";
    let replaced = registry.get(result.locator()).unwrap().content.clone();
    let replaced_log = replaced.find("console").unwrap();
    assert_eq!(
      coverage::map_index(replaced_log, &entry.diff_offsets),
      original.find("console").unwrap()
    );
    let dep = map
      .values()
      .find(|entry| entry.original_url == "file:///a/dep.js")
      .unwrap();
    assert_eq!(dep.diff_offsets, vec![(0, Some(0))]);
  }
}

use colloq_service::{ColloqService, Stores};
use colloq_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: ColloqService,
}
impl AppState {
	pub async fn new(config: colloq_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema(config.storage.index.vector_dim).await?;

		let service = ColloqService::new(config, Stores::from_db(db));

		Ok(Self::from_service(service))
	}

	pub fn from_service(service: ColloqService) -> Self {
		Self { service }
	}
}

use provote_store::{PollDirectory, PollInfo, StoreError};
use provote_types::PollId;

use crate::environment::{decode, encode};
use crate::{LmdbEnvironment, LmdbError};

impl LmdbEnvironment {
    fn write_poll(&self, poll: &PollInfo) -> Result<(), LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        self.polls_db
            .put(&mut wtxn, &poll.id.to_be_bytes(), &encode(poll)?)?;
        wtxn.commit()?;
        Ok(())
    }

    fn read_poll(&self, poll: PollId) -> Result<Option<PollInfo>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        match self.polls_db.get(&rtxn, &poll.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }
}

impl PollDirectory for LmdbEnvironment {
    fn put_poll(&self, poll: &PollInfo) -> Result<(), StoreError> {
        Ok(self.write_poll(poll)?)
    }

    fn get_poll(&self, poll: PollId) -> Result<Option<PollInfo>, StoreError> {
        Ok(self.read_poll(poll)?)
    }
}
